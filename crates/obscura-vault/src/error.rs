//! Error types

/// Vault errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No vault file exists yet
    #[error("Vault is not initialized")]
    Uninitialized,

    /// Vault exists but no key is loaded
    #[error("Vault is locked")]
    Locked,

    /// Initialization attempted over an existing vault
    #[error("Vault is already initialized")]
    AlreadyInitialized,

    /// Password did not open the sealed check value
    #[error("Invalid password")]
    InvalidPassword,

    /// Password rejected before key derivation
    #[error("Password too weak: {0}")]
    WeakPassword(String),

    /// Sealing or key derivation failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// No account with the given address
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Account name or address already present
    #[error("Duplicate account: {0}")]
    DuplicateAccount(String),

    /// Account name failed validation
    #[error("Invalid account name: {0}")]
    InvalidAccountName(String),

    /// Vault file I/O error
    #[error("Vault file error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Key or record error from the core crate
    #[error(transparent)]
    Core(#[from] obscura_core::Error),
}

/// Result type
pub type Result<T> = std::result::Result<T, Error>;
