//! Sealing primitives for vault secrets
//!
//! Implements ChaCha20-Poly1305 and AES-GCM sealing for secrets at rest,
//! Argon2id password key derivation, and key zeroization.

use crate::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use argon2::{Argon2, ParamsBuilder, Version};
use chacha20poly1305::ChaCha20Poly1305;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Sealed envelope version understood by this build
const ENVELOPE_VERSION: u8 = 1;

/// Argon2id cost parameters (m_cost KiB, t_cost, p_cost)
/// Memory: 64 MiB (65536 KiB), Iterations: 3, Parallelism: 4
const ARGON2_PARAMS: (u32, u32, u32) = (65536, 3, 4);

/// Minimum password length
pub const MIN_PASSWORD_LENGTH: usize = 12;

/// Sealing algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionAlgorithm {
    /// AES-256-GCM
    #[serde(rename = "aes-256-gcm")]
    AesGcm,
    /// ChaCha20-Poly1305
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

/// Key-encryption key derived from the vault password
#[derive(Clone)]
pub struct VaultKey {
    key: Zeroizing<[u8; 32]>,
    algorithm: EncryptionAlgorithm,
}

impl VaultKey {
    /// Generate a new random key
    pub fn generate(algorithm: EncryptionAlgorithm) -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);

        Self {
            key: Zeroizing::new(key),
            algorithm,
        }
    }

    /// Create from raw key bytes
    pub fn from_bytes(bytes: &[u8], algorithm: EncryptionAlgorithm) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::Crypto("Invalid key length".to_string()));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(bytes);

        Ok(Self {
            key: Zeroizing::new(key),
            algorithm,
        })
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }

    /// Seal a secret into a versioned envelope
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        match self.algorithm {
            EncryptionAlgorithm::AesGcm => self.encrypt_aes_gcm(plaintext),
            EncryptionAlgorithm::ChaCha20Poly1305 => self.encrypt_chacha20(plaintext),
        }
    }

    /// Open a sealed envelope
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self.algorithm {
            EncryptionAlgorithm::AesGcm => self.decrypt_aes_gcm(data),
            EncryptionAlgorithm::ChaCha20Poly1305 => self.decrypt_chacha20(data),
        }
    }

    fn encrypt_aes_gcm(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = Aes256Gcm::new(self.key.as_ref().into());

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Crypto(e.to_string()))?;

        // Format: [version(1)][algorithm(1)][nonce(12)][ciphertext(variable)]
        let mut result = Vec::with_capacity(1 + 1 + 12 + ciphertext.len());
        result.push(ENVELOPE_VERSION);
        result.push(0); // Algorithm: 0 = AES-GCM
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(result)
    }

    fn decrypt_aes_gcm(&self, data: &[u8]) -> Result<Vec<u8>> {
        let (nonce, ciphertext) = parse_envelope(data, 0)?;

        let cipher = Aes256Gcm::new(self.key.as_ref().into());
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| Error::Crypto(e.to_string()))
    }

    fn encrypt_chacha20(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(self.key.as_ref().into());

        let mut nonce_bytes = [0u8; 12];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = chacha20poly1305::Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Crypto(e.to_string()))?;

        // Format: [version(1)][algorithm(1)][nonce(12)][ciphertext(variable)]
        let mut result = Vec::with_capacity(1 + 1 + 12 + ciphertext.len());
        result.push(ENVELOPE_VERSION);
        result.push(1); // Algorithm: 1 = ChaCha20-Poly1305
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(result)
    }

    fn decrypt_chacha20(&self, data: &[u8]) -> Result<Vec<u8>> {
        let (nonce, ciphertext) = parse_envelope(data, 1)?;

        let cipher = ChaCha20Poly1305::new(self.key.as_ref().into());
        cipher
            .decrypt(chacha20poly1305::Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| Error::Crypto(e.to_string()))
    }
}

/// Split an envelope into nonce and ciphertext after header validation
fn parse_envelope(data: &[u8], expected_algorithm: u8) -> Result<(&[u8], &[u8])> {
    // Format: [version(1)][algorithm(1)][nonce(12)][ciphertext(variable)]
    if data.len() < 14 {
        return Err(Error::Crypto("Invalid envelope length".to_string()));
    }

    let version = data[0];
    let algorithm = data[1];

    if version != ENVELOPE_VERSION {
        return Err(Error::Crypto(format!(
            "Unsupported envelope version: {}",
            version
        )));
    }

    if algorithm != expected_algorithm {
        return Err(Error::Crypto(format!(
            "Algorithm mismatch: expected {}, got {}",
            expected_algorithm, algorithm
        )));
    }

    Ok((&data[2..14], &data[14..]))
}

/// Password strength buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordStrength {
    /// Weak: < 8 characters
    Weak,
    /// Fair: 8-11 characters
    Fair,
    /// Good: 12-15 characters with variety
    Good,
    /// Strong: 16+ characters with variety
    Strong,
}

impl PasswordStrength {
    /// Check whether the password meets the minimum bar
    pub fn is_acceptable(&self) -> bool {
        matches!(self, Self::Good | Self::Strong)
    }
}

/// Evaluate password strength
pub fn evaluate_strength(password: &str) -> PasswordStrength {
    let len = password.len();
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| !c.is_alphanumeric());

    let variety_score = [has_lower, has_upper, has_digit, has_special]
        .iter()
        .filter(|&&b| b)
        .count();

    if len < 8 {
        PasswordStrength::Weak
    } else if len < 12 {
        PasswordStrength::Fair
    } else if len < 16 || variety_score < 3 {
        PasswordStrength::Good
    } else {
        PasswordStrength::Strong
    }
}

/// Validate a password before it protects a vault
pub fn validate_password(password: &str) -> Result<()> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(Error::WeakPassword(format!(
            "must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    if !evaluate_strength(password).is_acceptable() {
        return Err(Error::WeakPassword(
            "use at least 12 characters with letters, numbers, and symbols".to_string(),
        ));
    }

    Ok(())
}

/// Derive raw key bytes from a password with Argon2id
pub fn derive_key_bytes(password: &str, salt: &[u8]) -> Result<[u8; 32]> {
    if salt.len() < 16 {
        return Err(Error::Crypto("Salt too short".to_string()));
    }

    let params = ParamsBuilder::new()
        .m_cost(ARGON2_PARAMS.0)
        .t_cost(ARGON2_PARAMS.1)
        .p_cost(ARGON2_PARAMS.2)
        .output_len(32)
        .build()
        .map_err(|e| Error::Crypto(e.to_string()))?;

    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, Version::V0x13, params);

    let mut key = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut *key)
        .map_err(|e| Error::Crypto(e.to_string()))?;

    let mut out = [0u8; 32];
    out.copy_from_slice(&key[..]);
    Ok(out)
}

/// Derive the key-encryption key for a password and stored salt
pub fn derive_vault_key(
    password: &str,
    salt: &[u8],
    algorithm: EncryptionAlgorithm,
) -> Result<VaultKey> {
    let key_bytes = Zeroizing::new(derive_key_bytes(password, salt)?);
    VaultKey::from_bytes(key_bytes.as_ref(), algorithm)
}

/// Generate a random salt
pub fn generate_salt() -> [u8; 32] {
    let mut salt = [0u8; 32];
    OsRng.fill_bytes(&mut salt);
    salt
}
