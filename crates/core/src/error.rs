//! Shared error kinds used across the `crab` workspace.
//!
//! Each crate boundary gets its own variant set; `CoreError`
//! covers the two kinds that belong to pure, I/O-free logic
//! (`crab-core`): malformed schedules and unparseable configuration.
//! Store, transport and protocol errors live in their own crates.

#[derive(thiserror::Error, Debug)]
pub enum ScheduleError {
    #[error("cron spec must have exactly 5 whitespace-separated fields, got {0}")]
    WrongFieldCount(usize),

    #[error("invalid field '{field}' in position {position}: {reason}")]
    InvalidField {
        field: String,
        position: &'static str,
        reason: String,
    },

    #[error("unknown timezone '{0}'")]
    UnknownTimezone(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config invalid: {0}")]
    Invalid(String),
}

#[derive(thiserror::Error, Debug)]
pub enum InternalError {
    #[error("{0}")]
    Other(String),
}
