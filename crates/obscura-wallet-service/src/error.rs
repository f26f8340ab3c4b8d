//! Service error types

/// Convenience alias for service results
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the wallet service
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No transaction with the given id
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(String),

    /// The requesting origin holds no grant for this operation
    #[error("Permission denied for origin {0}")]
    PermissionDenied(String),

    /// The operation is not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed or incomplete request payload
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Prover artifact download failed
    #[error("Prover artifact error: {0}")]
    Prover(String),

    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Core domain error
    #[error("Core error: {0}")]
    Core(#[from] obscura_core::Error),

    /// Vault error
    #[error("Vault error: {0}")]
    Vault(#[from] obscura_vault::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] obscura_storage_sqlite::Error),

    /// Sync or gateway error
    #[error("Sync error: {0}")]
    Sync(#[from] obscura_sync::Error),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Prover(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_errors_keep_their_message() {
        let err = Error::from(obscura_vault::Error::Locked);
        assert!(err.to_string().contains("Vault is locked"));

        let err = Error::UnknownTransaction("tx-1".to_string());
        assert_eq!(err.to_string(), "Unknown transaction: tx-1");
    }
}
