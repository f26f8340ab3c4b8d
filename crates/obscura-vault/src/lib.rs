//! Encrypted key vault for the Obscura wallet engine
//!
//! Holds the mnemonic and per-account private keys sealed under a
//! password-derived key. The vault exposes signing, record decryption and
//! transition authorization without ever handing a private key to callers.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod crypto;
pub mod error;
pub mod file;
pub mod vault;

pub use crypto::{
    derive_key_bytes, evaluate_strength, generate_salt, validate_password, EncryptionAlgorithm,
    PasswordStrength, VaultKey, MIN_PASSWORD_LENGTH,
};
pub use error::{Error, Result};
pub use file::{AccountEntry, AccountOrigin, VaultFile};
pub use vault::{AccountInfo, Vault, VaultStatus, MAX_ACCOUNT_NAME_LENGTH};
