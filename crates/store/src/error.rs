//! `StoreError`: "any persistence failure — surfaced to the
//! caller; monitor and notifier log and continue on the next tick."

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("output store not configured")]
    OutputStoreUnavailable,
}
