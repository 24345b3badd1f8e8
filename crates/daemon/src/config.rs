//! Daemon configuration: `[server]`, `[store]`,
//! `[outputstore]`, `[monitor]`, `[notify]`, `[transport:shell]`,
//! `[transport:email]`, `[transport:webhook]`, `[crab]`. Every section
//! carries a serde default so an absent `[section]` header still
//! resolves to sane values.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub outputstore: OutputStoreConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default, rename = "transport:shell")]
    pub transport_shell: ShellTransportConfig,
    #[serde(default, rename = "transport:email")]
    pub transport_email: EmailTransportConfig,
    #[serde(default, rename = "transport:webhook")]
    pub transport_webhook: WebhookTransportConfig,
    #[serde(default)]
    pub crab: CrabConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_cors_origins")]
    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
            cors_allowed_origins: d_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `sqlx` connection string, e.g. `sqlite:///var/lib/crab/crab.db`.
    #[serde(default = "d_store_dsn")]
    pub dsn: String,
    /// Days to retain event history; `None` disables the retention purge.
    #[serde(default)]
    pub retention_days: Option<i64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dsn: d_store_dsn(),
            retention_days: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputStoreConfig {
    /// When set, routes large stdout/stderr blobs to this backend instead
    /// of inlining them in `jobevent`.
    pub dsn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "d_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "d_lookback_secs")]
    pub lookback_secs: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_secs: d_tick_secs(),
            lookback_secs: d_lookback_secs(),
        }
    }
}

impl MonitorConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "d_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "d_rate_limit_capacity")]
    pub rate_limit_capacity: f64,
    #[serde(default = "d_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "d_backlog_cap")]
    pub backlog_cap: usize,
    #[serde(default = "d_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "d_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "d_timezone")]
    pub timezone: String,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: d_cooldown_secs(),
            rate_limit_capacity: d_rate_limit_capacity(),
            rate_limit_window_secs: d_rate_limit_window_secs(),
            backlog_cap: d_backlog_cap(),
            retry_max_attempts: d_retry_max_attempts(),
            retry_base_delay_ms: d_retry_base_delay_ms(),
            timezone: d_timezone(),
        }
    }
}

impl NotifyConfig {
    pub fn to_engine_config(&self) -> anyhow::Result<crab_notify::NotifyConfig> {
        Ok(crab_notify::NotifyConfig {
            cooldown: Duration::from_secs(self.cooldown_secs),
            rate_limit_capacity: self.rate_limit_capacity,
            rate_limit_window: Duration::from_secs(self.rate_limit_window_secs),
            backlog_cap: self.backlog_cap,
            retry_max_attempts: self.retry_max_attempts,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            timezone: crab_core::schedule::parse_tz(&self.timezone),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellTransportConfig {
    /// Shell command run via `sh -c` for each dispatch, with the alert
    /// fields passed as `CRAB_ALERT_*` environment variables. Absent ⇒
    /// the shell transport isn't registered at all.
    pub command_template: Option<String>,
}

impl Default for ShellTransportConfig {
    fn default() -> Self {
        Self { command_template: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EmailTransportConfig {
    pub smtp_host: Option<String>,
    #[serde(default = "d_smtp_port")]
    pub smtp_port: u16,
    pub from: Option<String>,
    pub username: Option<String>,
    /// Name of the environment variable holding the SMTP password.
    pub password_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebhookTransportConfig {
    /// Name of the environment variable holding the HMAC signing secret.
    pub secret_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrabConfig {
    /// Directory of static assets served for the status page.
    #[serde(default = "d_home")]
    pub home: PathBuf,
    #[serde(default = "d_pidfile")]
    pub pidfile: PathBuf,
    /// Serves `/feed.rss` when set; 404s otherwise. A feature flag
    /// discovered at startup, not a compile-time switch.
    #[serde(default)]
    pub feed: bool,
    /// Absolute URL used to build feed item links.
    #[serde(default = "d_base_url")]
    pub base_url: String,
}

impl Default for CrabConfig {
    fn default() -> Self {
        Self {
            home: d_home(),
            pidfile: d_pidfile(),
            feed: false,
            base_url: d_base_url(),
        }
    }
}

fn d_port() -> u16 {
    8039
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    // "*" is the permissive default for local/dev use; operators name
    // explicit origins in production.
    vec!["*".into()]
}
fn d_store_dsn() -> String {
    "sqlite://crab.db".into()
}
fn d_tick_secs() -> u64 {
    30
}
fn d_lookback_secs() -> i64 {
    3600
}
fn d_cooldown_secs() -> u64 {
    3600
}
fn d_rate_limit_capacity() -> f64 {
    10.0
}
fn d_rate_limit_window_secs() -> u64 {
    300
}
fn d_backlog_cap() -> usize {
    1000
}
fn d_retry_max_attempts() -> u32 {
    5
}
fn d_retry_base_delay_ms() -> u64 {
    2000
}
fn d_timezone() -> String {
    "UTC".into()
}
fn d_smtp_port() -> u16 {
    587
}
fn d_home() -> PathBuf {
    PathBuf::from("crab.home")
}
fn d_pidfile() -> PathBuf {
    PathBuf::from("crabd.pid")
}
fn d_base_url() -> String {
    "http://localhost:8039".into()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{label}] {}: {}", self.field, self.message)
    }
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.store.dsn.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "store.dsn".into(),
                message: "store DSN must not be empty".into(),
            });
        }
        if self.notify.timezone.parse::<chrono_tz::Tz>().is_err() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "notify.timezone".into(),
                message: format!(
                    "unknown timezone \"{}\", falling back to UTC",
                    self.notify.timezone
                ),
            });
        }
        if self.monitor.tick_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "monitor.tick_secs".into(),
                message: "tick_secs must be greater than 0".into(),
            });
        }
        if self.crab.feed && !self.crab.home.exists() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "crab.home".into(),
                message: format!(
                    "static asset directory {} does not exist",
                    self.crab.home.display()
                ),
            });
        }
        if self.transport_webhook.secret_env.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "transport_webhook.secret_env".into(),
                message: "no HMAC secret configured — outgoing webhooks will be unsigned".into(),
            });
        }

        issues
    }
}

/// Resolve the webhook HMAC secret from the environment, if configured.
impl WebhookTransportConfig {
    pub fn secret(&self) -> Option<String> {
        self.secret_env.as_deref().and_then(|name| std::env::var(name).ok())
    }
}

impl EmailTransportConfig {
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = self.username.clone()?;
        let password = self.password_env.as_deref().and_then(|name| std::env::var(name).ok())?;
        Some((username, password))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_fatal_errors() {
        let config = Config::default();
        let issues = config.validate();
        assert!(!issues.iter().any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut config = Config::default();
        config.server.port = 0;
        let issues = config.validate();
        assert!(issues.iter().any(|i| i.field == "server.port" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn empty_toml_resolves_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.port, 8039);
        assert_eq!(config.monitor.tick_secs, 30);
        assert_eq!(config.notify.cooldown_secs, 3600);
    }
}
