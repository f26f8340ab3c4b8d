//! Storage error types

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, Error>;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Requested row does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Persisted state violates an invariant (terminal status transition,
    /// lock conflict, dangling reference)
    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Domain error from the core layer
    #[error(transparent)]
    Core(#[from] obscura_core::Error),
}
