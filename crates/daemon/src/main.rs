use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crab_daemon::config::{Config, ConfigSeverity};
use crab_daemon::state::{AppState, StatusCache};
use crab_daemon::{api, monitor::Monitor, notifier, pid};
use crab_notify::{EmailTransport, NotificationEngine, ShellTransport, Transport, WebhookTransport};
use crab_store::{connect_output_store, JobStore, SqlxJobStore};

#[derive(Debug, Parser)]
#[command(name = "crabd", version, about = "cron-job liveness and alerting daemon")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, env = "CRAB_CONFIG", default_value = "crabd.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the daemon (default when no subcommand is given).
    Serve,
    /// Parse and validate the configuration, then exit.
    ConfigCheck,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Some(Command::ConfigCheck) => {
            let issues = config.validate();
            for issue in &issues {
                println!("{issue}");
            }
            if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
                std::process::exit(1);
            }
            Ok(())
        }
        None | Some(Command::Serve) => {
            init_tracing();
            run_server(Arc::new(config)).await
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,crab=debug"));
    let is_tty = atty_stdout();
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if is_tty {
        subscriber.init();
    } else {
        subscriber.json().init();
    }
}

/// Crude TTY check without a terminal-detection crate dependency: the
/// teacher's pack reaches for `is-terminal`/`atty` for this, but the
/// daemon only needs a best-effort default, so a conservative fallback
/// (structured logs unless explicitly a TTY) is acceptable here.
fn atty_stdout() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}

fn load_config(path: &str) -> anyhow::Result<Config> {
    if !std::path::Path::new(path).exists() {
        tracing::warn!(path, "no config file found, using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading config {path}"))?;
    let config: Config = toml::from_str(&raw).with_context(|| format!("parsing config {path}"))?;
    Ok(config)
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    tracing::info!("crabd starting");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── PID file: refuses to start if another instance holds it ──
    let pid_handle = pid::write_pid_file(&config.crab.pidfile)?;
    let pid_path = config.crab.pidfile.clone();

    // Everything below runs with the PID file held; whatever happens —
    // clean shutdown, signal, or a fatal error bubbling out of `?` — the
    // file comes off on every path.
    let result = serve(config).await;
    pid::remove_pid_file(&pid_path, pid_handle);
    result
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    // ── Store ────────────────────────────────────────────────────────
    let mut store = SqlxJobStore::connect(&config.store.dsn)
        .await
        .context("connecting to store")?;
    if let Some(dsn) = &config.outputstore.dsn {
        let output_store = connect_output_store(dsn).await.context("connecting to output store")?;
        store = store.with_output_store(Arc::from(output_store));
        tracing::info!("output store configured, large payloads route there");
    }
    let store: Arc<dyn JobStore> = Arc::new(store);
    tracing::info!(dsn = %config.store.dsn, "store ready");

    // ── Transport registry: maps a configured name to a constructor,
    // no runtime class-graph introspection ──────────────────────────
    let mut transports: HashMap<String, Arc<dyn Transport>> = HashMap::new();
    if let Some(command_template) = &config.transport_shell.command_template {
        transports.insert(
            "shell".into(),
            Arc::new(ShellTransport {
                command_template: command_template.clone(),
            }),
        );
        tracing::info!("shell transport configured");
    }
    if let Some(host) = &config.transport_email.smtp_host {
        match EmailTransport::new(
            host,
            config.transport_email.smtp_port,
            config.transport_email.from.as_deref().unwrap_or("crabd@localhost"),
            config.transport_email.credentials(),
        ) {
            Ok(t) => {
                transports.insert("email".into(), Arc::new(t));
                tracing::info!(host, "email transport configured");
            }
            Err(e) => tracing::warn!(error = %e, "email transport misconfigured, disabled"),
        }
    }
    transports.insert(
        "webhook".into(),
        Arc::new(WebhookTransport::new(config.transport_webhook.secret())),
    );

    // ── Notification engine ─────────────────────────────────────────
    let notify_config = config.notify.to_engine_config()?;
    let engine = Arc::new(NotificationEngine::new(store.clone(), transports, notify_config));

    // ── Liveness monitor ─────────────────────────────────────────────
    let status_cache = Arc::new(StatusCache::default());
    let (monitor, status_rx) = Monitor::new(
        store.clone(),
        status_cache.clone(),
        config.monitor.tick(),
        config.monitor.lookback_secs,
        config.store.retention_days,
    );

    let cancel = CancellationToken::new();

    let monitor_handle = {
        let cancel = cancel.clone();
        tokio::spawn(monitor.run(cancel))
    };
    let notifier_handle = {
        let cancel = cancel.clone();
        let store = store.clone();
        let engine = engine.clone();
        tokio::spawn(notifier::run(status_rx, store, engine, cancel))
    };

    // ── HTTP server ──────────────────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        store: store.clone(),
        notify: engine.clone(),
        status_cache,
    };
    let app = api::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "crabd listening");

    let shutdown_cancel = cancel.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_cancel.cancel();
        })
        .await;

    cancel.cancel();
    let _ = monitor_handle.await;
    let _ = notifier_handle.await;

    result.context("axum server error")?;
    tracing::info!("crabd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("installing SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining in-flight work");
}
