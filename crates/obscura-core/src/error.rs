//! Error types for Obscura Core
//!
//! Error taxonomy shared by the vault, storage, sync and lifecycle layers.

use std::fmt;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Obscura Core errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unlocked records do not cover the requested amount
    #[error("Insufficient balance: need {needed} microcredits, have {available}")]
    InsufficientBalance {
        /// Microcredits required by the request (amount plus fee where applicable)
        needed: u64,
        /// Microcredits available in unspent, unlocked records
        available: u64,
    },

    /// Invalid address format
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid private or view key
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Invalid mnemonic phrase
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Malformed program source
    #[error("Invalid program: {0}")]
    InvalidProgram(String),

    /// Malformed record plaintext
    #[error("Invalid plaintext: {0}")]
    InvalidPlaintext(String),

    /// Malformed record ciphertext
    #[error("Invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    /// Record decryption failed (wrong view key or corrupted ciphertext)
    #[error("Record decryption failed: {0}")]
    Decryption(String),

    /// Malformed ownership candidate
    #[error("Invalid ownership candidate: {0}")]
    InvalidCandidate(String),

    /// Invalid or unverifiable signature
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Invalid amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Unknown status or kind string in persisted state
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// Amount overflow
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if error is a user-facing error (vs internal error)
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Error::InsufficientBalance { .. }
                | Error::InvalidAddress(_)
                | Error::InvalidMnemonic(_)
                | Error::InvalidAmount(_)
        )
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Error::InsufficientBalance { .. } => {
                "You don't have enough unlocked balance for this transaction. Please check your balance and try again.".to_string()
            }
            Error::InvalidAddress(_) => {
                "The recipient address is invalid. Please check and try again.".to_string()
            }
            Error::InvalidMnemonic(_) => {
                "The recovery phrase is invalid. Please check and try again.".to_string()
            }
            Error::InvalidAmount(_) => {
                "The amount is invalid. Please enter a valid amount.".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InsufficientBalance { .. }
            | Error::InvalidAmount(_)
            | Error::AmountOverflow(_) => ErrorCategory::Amount,
            Error::InvalidAddress(_) => ErrorCategory::Address,
            Error::InvalidKey(_) | Error::InvalidMnemonic(_) => ErrorCategory::Keys,
            Error::InvalidProgram(_) => ErrorCategory::Program,
            Error::InvalidPlaintext(_)
            | Error::InvalidCiphertext(_)
            | Error::Decryption(_)
            | Error::InvalidCandidate(_) => ErrorCategory::Records,
            Error::InvalidSignature(_) => ErrorCategory::Signature,
            Error::InvalidStatus(_) | Error::Serialization(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Amount-related errors
    Amount,
    /// Address-related errors
    Address,
    /// Key-related errors
    Keys,
    /// Program-related errors
    Program,
    /// Record-related errors
    Records,
    /// Signature-related errors
    Signature,
    /// Internal/system errors
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Amount => write!(f, "Amount"),
            ErrorCategory::Address => write!(f, "Address"),
            ErrorCategory::Keys => write!(f, "Keys"),
            ErrorCategory::Program => write!(f, "Program"),
            ErrorCategory::Records => write!(f, "Records"),
            ErrorCategory::Signature => write!(f, "Signature"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}
