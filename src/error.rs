//! Error types shared by the sinks and the listener pool.

use thiserror::Error;

/// Failure of a best-effort sink. Callers log these and carry on.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("audit log write failed: {0}")]
    Audit(#[from] std::io::Error),

    #[error("invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build mail message: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("smtp delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Error)]
pub enum HoneypotError {
    #[error("no ports configured for scan detection")]
    NoPorts,

    #[error("invalid configuration: {field} - {message}")]
    ConfigInvalid { field: String, message: String },
}
