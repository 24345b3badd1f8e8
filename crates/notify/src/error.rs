//! `TransportError`: "notification dispatch failure — retried
//! per §4.5, then recorded."

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("shell transport failed: {0}")]
    Shell(#[from] std::io::Error),

    #[error("shell command exited with status {0}")]
    ShellExitStatus(i32),

    #[error("email message could not be built: {0}")]
    EmailBuild(#[from] lettre::error::Error),

    #[error("email address {0:?} is not valid: {1}")]
    EmailAddress(String, lettre::address::AddressError),

    #[error("smtp transport failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("webhook responded with status {0}")]
    WebhookStatus(u16),

    #[error("unknown transport {0:?}")]
    UnknownTransport(String),
}
