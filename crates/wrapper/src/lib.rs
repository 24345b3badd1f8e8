//! `crabsh`: the job-execution wrapper. Invoked by cron in
//! place of the real command; reports lifecycle events to `crabd` over
//! the client protocol and then runs the command.

pub mod client;
pub mod config;
pub mod env;
pub mod exec;
pub mod lock;
