use clap::Parser;
use tracing_subscriber::EnvFilter;

use crab_wrapper::client::DaemonClient;
use crab_wrapper::config::WrapperConfig;
use crab_wrapper::env::WrapperEnv;
use crab_wrapper::{exec, lock};

#[derive(Debug, Parser)]
#[command(name = "crabsh", about = "cron job wrapper reporting lifecycle to crabd")]
struct Cli {
    /// Path to the (shared) crabd config file, for `[crab] base_url` and
    /// `[crabsh] allow_inhibit`.
    #[arg(long, env = "CRABSH_CONFIG", default_value = "crabd.toml")]
    config: String,

    /// The command to run, exactly as cron would invoke it.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let cli = Cli::parse();
    let env = WrapperEnv::from_process_env();
    let command = cli.command.join(" ");

    // CRABIGNORE bypasses reporting entirely: just run the command.
    if env.ignore {
        return match exec::run(&env.crabshell, &command, env.echo).await {
            Ok(outcome) => outcome.status,
            Err(e) => {
                tracing::error!(error = %e, "failed to start command");
                1
            }
        };
    }

    // Local already-running detection via the job's own PID file.
    let _lock_guard = match env.pidfile.as_deref() {
        Some(path) => match lock::try_acquire(std::path::Path::new(path)) {
            Ok(Some(guard)) => Some(guard),
            Ok(None) => {
                tracing::warn!(pidfile = path, "job already running, reporting ALREADYRUNNING");
                let config = WrapperConfig::load(&cli.config);
                let client = DaemonClient::new(config.base_url);
                if let Err(e) = client.report(&env.host, env.crabid.as_deref(), &command, "ALREADYRUNNING").await {
                    tracing::warn!(error = %e, "could not report ALREADYRUNNING to daemon");
                }
                return 0;
            }
            Err(e) => {
                tracing::warn!(pidfile = path, error = %e, "could not acquire job pidfile, proceeding without it");
                None
            }
        },
        None => None,
    };

    let config = WrapperConfig::load(&cli.config);
    let client = DaemonClient::new(config.base_url);

    if let Err(e) = client.register(&env.host, env.crabid.as_deref(), &command).await {
        tracing::error!(error = %e, "could not register job with daemon");
        return 1;
    }

    let start = match client.start(&env.host, env.crabid.as_deref(), &command).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(error = %e, "could not report START to daemon");
            return 1;
        }
    };

    if start.inhibit && config.allow_inhibit {
        tracing::info!("job is inhibited, reporting INHIBITED and skipping the run");
        if let Err(e) = client.report(&env.host, env.crabid.as_deref(), &command, "INHIBITED").await {
            tracing::warn!(error = %e, "could not report INHIBITED to daemon");
        }
        return 0;
    }

    match exec::run(&env.crabshell, &command, env.echo).await {
        Ok(outcome) => {
            if let Err(e) = client
                .finish(
                    &env.host,
                    env.crabid.as_deref(),
                    &command,
                    outcome.status,
                    Some(outcome.stdout.as_str()),
                    Some(outcome.stderr.as_str()),
                )
                .await
            {
                tracing::warn!(error = %e, "could not report FINISH to daemon");
            }
            outcome.status
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start command");
            if let Err(e) = client.report(&env.host, env.crabid.as_deref(), &command, "COULDNOTSTART").await {
                tracing::warn!(error = %e, "could not report COULDNOTSTART to daemon");
            }
            1
        }
    }
}
