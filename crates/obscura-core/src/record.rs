//! Record ciphertexts, plaintexts and serial numbers
//!
//! A record ciphertext carries a version byte, the sender's published nonce
//! point and an AEAD payload. The symmetric key is derived from the shared
//! secret between the nonce and the recipient's view key, so decryption with
//! any other view key fails at the authentication tag rather than producing
//! plausible garbage.

use crate::keys::{agree, hash_256, point_x_bytes, Address, PrivateKey, ViewKey};
use crate::ownership::{blind_owner_x, OwnershipCandidate};
use crate::program::RecordType;
use crate::{Error, Result};
use bech32::{Bech32, Hrp};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use group::{Group, GroupEncoding};
use jubjub::{AffinePoint, ExtendedPoint, SubgroupPoint};
use std::collections::BTreeMap;

/// Bech32 HRP for record ciphertexts
pub const RECORD_HRP: &str = "obscrec";

/// Ciphertext envelope version
const CIPHERTEXT_VERSION: u8 = 1;

const RECORD_KEY_PERSONALIZATION: &[u8; 16] = b"Obscura_RecKey__";
const SERIAL_PERSONALIZATION: &[u8; 16] = b"Obscura_Serial__";
const RECORD_ID_PERSONALIZATION: &[u8; 16] = b"Obscura_RecordId";

/// Decrypted record contents: field name to suffixed literal
///
/// The canonical JSON form (sorted keys) is what serial numbers and
/// commitments hash over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordPlaintext {
    fields: BTreeMap<String, String>,
}

impl RecordPlaintext {
    /// Build a plaintext with the two fields every value record carries
    pub fn new(owner: &Address, microcredits: u64) -> Result<Self> {
        let mut fields = BTreeMap::new();
        fields.insert("owner".to_string(), owner.encode()?);
        fields.insert("microcredits".to_string(), format!("{microcredits}u64"));
        Ok(Self { fields })
    }

    /// Add or replace a field
    pub fn insert(&mut self, name: &str, value: &str) {
        self.fields.insert(name.to_string(), value.to_string());
    }

    /// Parse from the canonical JSON object form
    pub fn from_json(json: &str) -> Result<Self> {
        let fields: BTreeMap<String, String> = serde_json::from_str(json)
            .map_err(|e| Error::InvalidPlaintext(format!("not a string map: {e}")))?;
        if fields.is_empty() {
            return Err(Error::InvalidPlaintext("no fields".to_string()));
        }
        Ok(Self { fields })
    }

    /// Canonical JSON form (sorted keys)
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.fields).unwrap_or_else(|_| "{}".to_string())
    }

    /// Owning address, from the `owner` field
    pub fn owner(&self) -> Result<Address> {
        let raw = self
            .fields
            .get("owner")
            .ok_or_else(|| Error::InvalidPlaintext("missing owner field".to_string()))?;
        Address::from_encoded(raw)
    }

    /// Spendable amount, from the `microcredits` field
    pub fn microcredits(&self) -> Result<u64> {
        let raw = self
            .fields
            .get("microcredits")
            .ok_or_else(|| Error::InvalidPlaintext("missing microcredits field".to_string()))?;
        let digits = raw.strip_suffix("u64").unwrap_or(raw);
        digits
            .parse()
            .map_err(|_| Error::InvalidPlaintext(format!("bad microcredits literal: {raw}")))
    }

    /// Field accessor
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str())
    }

    /// Whether this plaintext's field set matches a program record type
    pub fn matches_type(&self, record_type: &RecordType) -> bool {
        let mine: std::collections::BTreeSet<&str> =
            self.fields.keys().map(|k| k.as_str()).collect();
        let theirs: std::collections::BTreeSet<&str> =
            record_type.fields.iter().map(|f| f.name.as_str()).collect();
        mine == theirs
    }
}

/// Sender-side ownership tag material, published alongside the ciphertext
#[derive(Debug, Clone)]
pub struct RecordTag {
    /// Affine u-coordinate of the nonce point (hex)
    pub nonce_x: String,
    /// Affine v-coordinate of the nonce point (hex)
    pub nonce_y: String,
    /// Blinded owner tag (hex)
    pub owner_x: String,
}

impl RecordTag {
    /// Combine with transition coordinates into a full scanner candidate
    pub fn into_candidate(self, transition_id: &str, output_index: u32) -> OwnershipCandidate {
        OwnershipCandidate {
            nonce_x: self.nonce_x,
            nonce_y: self.nonce_y,
            owner_x: self.owner_x,
            transition_id: transition_id.to_string(),
            output_index,
        }
    }
}

/// Encrypted record envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordCiphertext {
    bytes: Vec<u8>,
}

impl RecordCiphertext {
    /// Encrypt a plaintext to a recipient address.
    ///
    /// Returns the ciphertext and the ownership tag the chain would publish
    /// for it.
    pub fn seal(recipient: &Address, plaintext: &RecordPlaintext) -> Result<(Self, RecordTag)> {
        let ephemeral = crate::keys::random_scalar();
        let nonce_point = ExtendedPoint::from(SubgroupPoint::generator() * ephemeral);
        let shared_x = point_x_bytes(&agree(&ephemeral, &recipient.to_point()));

        let key_bytes = hash_256(RECORD_KEY_PERSONALIZATION, None, &[&shared_x]);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
        // The key is unique per record, so a fixed nonce is safe.
        let sealed = cipher
            .encrypt(Nonce::from_slice(&[0u8; 12]), plaintext.to_json().as_bytes())
            .map_err(|_| Error::InvalidCiphertext("encryption failed".to_string()))?;

        let mut bytes = Vec::with_capacity(1 + 32 + sealed.len());
        bytes.push(CIPHERTEXT_VERSION);
        bytes.extend_from_slice(&nonce_point.to_bytes());
        bytes.extend_from_slice(&sealed);

        let affine = AffinePoint::from(nonce_point);
        let tag = RecordTag {
            nonce_x: hex::encode(affine.get_u().to_bytes()),
            nonce_y: hex::encode(affine.get_v().to_bytes()),
            owner_x: hex::encode(blind_owner_x(recipient, &shared_x).to_bytes()),
        };
        Ok((Self { bytes }, tag))
    }

    /// Decrypt with a view key.
    ///
    /// Fails with [`Error::Decryption`] when the view key does not own the
    /// record; the AEAD tag makes the rejection explicit.
    pub fn open(&self, view_key: &ViewKey) -> Result<RecordPlaintext> {
        let (nonce_point, payload) = self.parse()?;
        let shared_x = view_key.agree_x_bytes(&nonce_point);
        let key_bytes = hash_256(RECORD_KEY_PERSONALIZATION, None, &[&shared_x]);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&[0u8; 12]), payload)
            .map_err(|_| {
                Error::Decryption("authentication failed, view key does not own this record".to_string())
            })?;
        let json = String::from_utf8(plaintext)
            .map_err(|_| Error::Decryption("plaintext is not UTF-8".to_string()))?;
        RecordPlaintext::from_json(&json)
    }

    fn parse(&self) -> Result<(ExtendedPoint, &[u8])> {
        if self.bytes.len() < 1 + 32 + 16 {
            return Err(Error::InvalidCiphertext("ciphertext too short".to_string()));
        }
        if self.bytes[0] != CIPHERTEXT_VERSION {
            return Err(Error::InvalidCiphertext(format!(
                "unsupported ciphertext version {}",
                self.bytes[0]
            )));
        }
        let mut point_bytes = [0u8; 32];
        point_bytes.copy_from_slice(&self.bytes[1..33]);
        let nonce_point = Option::from(ExtendedPoint::from_bytes(&point_bytes))
            .ok_or_else(|| Error::InvalidCiphertext("invalid nonce point".to_string()))?;
        Ok((nonce_point, &self.bytes[33..]))
    }

    /// Raw envelope bytes
    pub fn to_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Wrap raw envelope bytes without validating them
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Encode as bech32 (`obscrec1...`)
    pub fn encode(&self) -> Result<String> {
        let hrp = Hrp::parse(RECORD_HRP)
            .map_err(|e| Error::InvalidCiphertext(format!("Invalid HRP: {e}")))?;
        bech32::encode::<Bech32>(hrp, &self.bytes)
            .map_err(|e| Error::InvalidCiphertext(format!("Bech32 encode failed: {e}")))
    }

    /// Parse from bech32 (`obscrec1...`)
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let (hrp, data) = bech32::decode(encoded)
            .map_err(|e| Error::InvalidCiphertext(format!("Bech32 decode failed: {e}")))?;
        if hrp.as_str() != RECORD_HRP {
            return Err(Error::InvalidCiphertext(format!(
                "Expected HRP {RECORD_HRP}, got {}",
                hrp.as_str()
            )));
        }
        let ciphertext = Self { bytes: data };
        ciphertext.parse()?;
        Ok(ciphertext)
    }
}

/// Content-derived record id, stable across resyncs
pub fn record_id(chain: &str, transition_id: &str, output_index: u32, ciphertext: &RecordCiphertext) -> String {
    let digest = hash_256(
        RECORD_ID_PERSONALIZATION,
        None,
        &[
            chain.as_bytes(),
            transition_id.as_bytes(),
            &output_index.to_le_bytes(),
            ciphertext.to_bytes(),
        ],
    );
    hex::encode(digest)
}

/// Serial number for a record: a keyed digest over the program, record kind
/// and plaintext commitment.
///
/// Only the private key holder can produce it, and it is what the chain
/// publishes when the record is spent.
pub fn serial_number(
    private_key: &PrivateKey,
    program_id: &str,
    record_name: &str,
    plaintext: &RecordPlaintext,
) -> String {
    let commitment = hash_256(SERIAL_PERSONALIZATION, None, &[plaintext.to_json().as_bytes()]);
    let digest = hash_256(
        SERIAL_PERSONALIZATION,
        Some(&private_key.to_bytes()),
        &[program_id.as_bytes(), record_name.as_bytes(), &commitment],
    );
    hex::encode(digest)
}
