//! Sync error types

use std::time::Duration;

/// Convenience alias for sync results
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the sync pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Gateway request failed (network or remote fault)
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// The remote explicitly refused the payload; never retried
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Request exceeded its deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Operation cancelled
    #[error("Sync cancelled")]
    Cancelled,

    /// Internal pipeline failure
    #[error("Sync error: {0}")]
    Sync(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] obscura_storage_sqlite::Error),

    /// Vault error
    #[error("Vault error: {0}")]
    Vault(#[from] obscura_vault::Error),

    /// Core domain error
    #[error("Core error: {0}")]
    Core(#[from] obscura_core::Error),
}

impl Error {
    /// Whether retrying the same request can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Gateway(_) | Error::Timeout(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Gateway(err.to_string())
    }
}
