//! Vault file model and persistence
//!
//! The vault file carries the Argon2id salt, a sealed check value used to
//! verify unlock attempts, the sealed mnemonic, and the account list. Only
//! account metadata (name, address, derivation index, origin) is plaintext;
//! every secret is a sealed envelope, hex encoded.

use crate::crypto::EncryptionAlgorithm;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File format version understood by this build
pub const VAULT_FILE_VERSION: u32 = 1;

/// How an account's key entered the vault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountOrigin {
    /// Derived from the vault mnemonic at a fixed index
    Derived,
    /// Imported from an external private key
    Imported,
}

/// One account entry: plaintext metadata plus the sealed private key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountEntry {
    /// Display name, unique within the vault
    pub name: String,
    /// Bech32 address, unique within the vault
    pub address: String,
    /// HD derivation index, `None` for imported keys
    pub index: Option<u32>,
    /// Derived or imported
    pub origin: AccountOrigin,
    /// Hex sealed envelope holding the bech32 private key
    pub sealed_key: String,
}

/// Persisted vault contents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultFile {
    /// File format version
    pub version: u32,
    /// Sealing algorithm for every envelope in this file
    pub algorithm: EncryptionAlgorithm,
    /// Hex Argon2id salt
    pub salt: String,
    /// Hex sealed check value, opened to verify unlock attempts
    pub check: String,
    /// Hex sealed mnemonic phrase
    pub mnemonic: String,
    /// Whether the mnemonic was generated by this vault rather than
    /// supplied at initialization
    #[serde(default)]
    pub seed_generated: bool,
    /// Accounts in creation order
    pub accounts: Vec<AccountEntry>,
}

impl VaultFile {
    /// Load the vault file, returning `None` when it does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let file: Self = serde_json::from_slice(&bytes)?;
        if file.version != VAULT_FILE_VERSION {
            return Err(Error::Crypto(format!(
                "Unsupported vault file version: {}",
                file.version
            )));
        }

        Ok(Some(file))
    }

    /// Write the vault file atomically (write to a sibling, then rename)
    pub fn store(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;

        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)?;
        let _ = std::fs::remove_file(path);
        std::fs::rename(&tmp_path, path)?;

        Ok(())
    }

    /// Find an account by address
    pub fn account(&self, address: &str) -> Option<&AccountEntry> {
        self.accounts.iter().find(|a| a.address == address)
    }

    /// Find an account by address, mutably
    pub fn account_mut(&mut self, address: &str) -> Option<&mut AccountEntry> {
        self.accounts.iter_mut().find(|a| a.address == address)
    }

    /// Check whether a display name is already taken
    pub fn name_taken(&self, name: &str) -> bool {
        self.accounts.iter().any(|a| a.name == name)
    }

    /// Check whether an address is already present
    pub fn address_taken(&self, address: &str) -> bool {
        self.accounts.iter().any(|a| a.address == address)
    }
}
