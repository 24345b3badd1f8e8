//! The `crabd` daemon: liveness monitor, client protocol
//! handler (§4.6), query/read API (§4.7), config, PID file discipline
//! and CLI glue. Exposed as a library so integration tests can drive the
//! `axum` router in-process without a subprocess.

pub mod api;
pub mod config;
pub mod error;
pub mod monitor;
pub mod notifier;
pub mod pid;
pub mod state;

pub use config::Config;
pub use state::AppState;
