//! Key derivation and addresses
//!
//! Implements the wallet key hierarchy over the jubjub curve: a BIP-39 seed
//! yields per-account private keys by indexed derivation, each private key
//! yields a view key (detection and decryption authority), and the address
//! is the view key's public point. Schnorr signatures over the same curve
//! back arbitrary-byte signing and transition authorization.

use crate::{Error, Result};
use bech32::{Bech32, Hrp};
use bip39::{Language, Mnemonic};
use blake2b_simd::Params as Blake2bParams;
use group::cofactor::CofactorGroup;
use group::ff::Field;
use group::{Group, GroupEncoding};
use jubjub::{AffinePoint, ExtendedPoint, Fr, SubgroupPoint};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

/// Bech32 HRP for addresses
pub const ADDRESS_HRP: &str = "obsc";
/// Bech32 HRP for view keys
pub const VIEW_KEY_HRP: &str = "obscview";
/// Bech32 HRP for private keys
pub const PRIVATE_KEY_HRP: &str = "obscsk";

const SPEND_KEY_PERSONALIZATION: &[u8; 16] = b"Obscura_SpendKey";
const VIEW_KEY_PERSONALIZATION: &[u8; 16] = b"Obscura_ViewKey_";
const SIG_NONCE_PERSONALIZATION: &[u8; 16] = b"Obscura_SigNonce";
const SIG_CHALLENGE_PERSONALIZATION: &[u8; 16] = b"Obscura_SigChal_";

/// Hash arbitrary input to a jubjub scalar via wide reduction.
pub(crate) fn hash_to_fr(personalization: &[u8; 16], key: Option<&[u8]>, inputs: &[&[u8]]) -> Fr {
    let mut params = Blake2bParams::new();
    params.hash_length(64).personal(personalization);
    if let Some(key) = key {
        params.key(key);
    }
    let mut state = params.to_state();
    for input in inputs {
        state.update(input);
    }
    let mut wide = [0u8; 64];
    wide.copy_from_slice(state.finalize().as_bytes());
    Fr::from_bytes_wide(&wide)
}

/// Hash arbitrary input to a Blake2b-256 digest.
pub(crate) fn hash_256(personalization: &[u8; 16], key: Option<&[u8]>, inputs: &[&[u8]]) -> [u8; 32] {
    let mut params = Blake2bParams::new();
    params.hash_length(32).personal(personalization);
    if let Some(key) = key {
        params.key(key);
    }
    let mut state = params.to_state();
    for input in inputs {
        state.update(input);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(state.finalize().as_bytes());
    out
}

/// Diffie-Hellman agreement used by ownership tags and record keys.
///
/// Both sides clear the cofactor of the foreign point before multiplying, so
/// sender and receiver land on the same subgroup element even when the wire
/// encoding carried a small-order component.
pub(crate) fn agree(scalar: &Fr, point: &ExtendedPoint) -> SubgroupPoint {
    point.clear_cofactor() * scalar
}

/// Affine u-coordinate bytes of a subgroup point.
pub(crate) fn point_x_bytes(point: &SubgroupPoint) -> [u8; 32] {
    AffinePoint::from(ExtendedPoint::from(*point))
        .get_u()
        .to_bytes()
}

fn encode_bech32(hrp: &str, data: &[u8]) -> Result<String> {
    let hrp = Hrp::parse(hrp).map_err(|e| Error::InvalidKey(format!("Invalid HRP: {e}")))?;
    bech32::encode::<Bech32>(hrp, data)
        .map_err(|e| Error::InvalidKey(format!("Bech32 encode failed: {e}")))
}

fn decode_bech32(expected_hrp: &str, encoded: &str) -> Result<[u8; 32]> {
    let (hrp, data) = bech32::decode(encoded)
        .map_err(|e| Error::InvalidKey(format!("Bech32 decode failed: {e}")))?;
    if hrp.as_str() != expected_hrp {
        return Err(Error::InvalidKey(format!(
            "Expected HRP {expected_hrp}, got {}",
            hrp.as_str()
        )));
    }
    let bytes: [u8; 32] = data
        .try_into()
        .map_err(|_| Error::InvalidKey("Payload must be 32 bytes".to_string()))?;
    Ok(bytes)
}

/// BIP-39 seed material backing HD account derivation
pub struct Seed {
    bytes: Zeroizing<[u8; 64]>,
}

impl Seed {
    /// Derive the seed from a mnemonic phrase and optional passphrase
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
            .map_err(|e| Error::InvalidMnemonic(e.to_string()))?;
        Ok(Self {
            bytes: Zeroizing::new(mnemonic.to_seed(passphrase)),
        })
    }

    /// Generate a new random mnemonic
    ///
    /// # Arguments
    /// * `word_count` - Number of words in mnemonic (12, 18, or 24). Defaults to 24.
    pub fn generate_mnemonic(word_count: Option<u32>) -> String {
        // BIP39 entropy requirements:
        // 12 words = 128 bits = 16 bytes
        // 18 words = 192 bits = 24 bytes
        // 24 words = 256 bits = 32 bytes
        let entropy_size = match word_count.unwrap_or(24) {
            12 => 16,
            18 => 24,
            _ => 32,
        };

        let mut entropy = vec![0u8; entropy_size];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut entropy);

        let mnemonic = Mnemonic::from_entropy(&entropy)
            .expect("entropy sizes above are valid for BIP-39");
        mnemonic.to_string()
    }

    /// Validate a mnemonic phrase without deriving anything from it
    pub fn validate_mnemonic(phrase: &str) -> Result<()> {
        Mnemonic::parse_in_normalized(Language::English, phrase)
            .map(|_| ())
            .map_err(|e| Error::InvalidMnemonic(e.to_string()))
    }
}

/// Per-account spending key
#[derive(Clone)]
pub struct PrivateKey {
    sk: Fr,
}

impl PrivateKey {
    /// Derive the private key for an account index from the seed
    pub fn derive(seed: &Seed, index: u32) -> Self {
        let sk = hash_to_fr(
            SPEND_KEY_PERSONALIZATION,
            None,
            &[seed.bytes.as_ref(), &index.to_le_bytes()],
        );
        Self { sk }
    }

    /// Parse a bech32-encoded private key (`obscsk1...`)
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let bytes = decode_bech32(PRIVATE_KEY_HRP, encoded)?;
        let sk: Fr = Option::from(Fr::from_bytes(&bytes))
            .ok_or_else(|| Error::InvalidKey("Private key is not a valid scalar".to_string()))?;
        if bool::from(sk.ct_eq(&Fr::zero())) {
            return Err(Error::InvalidKey("Private key must be non-zero".to_string()));
        }
        Ok(Self { sk })
    }

    /// Encode as bech32 (`obscsk1...`)
    pub fn encode(&self) -> Result<String> {
        encode_bech32(PRIVATE_KEY_HRP, &self.sk.to_bytes())
    }

    /// Raw scalar bytes (used for keyed serial-number derivation)
    pub fn to_bytes(&self) -> [u8; 32] {
        self.sk.to_bytes()
    }

    /// Derive the view key
    pub fn view_key(&self) -> ViewKey {
        let vk = hash_to_fr(VIEW_KEY_PERSONALIZATION, None, &[&self.sk.to_bytes()]);
        ViewKey { vk }
    }

    /// Derive the address (through the view key)
    pub fn address(&self) -> Address {
        self.view_key().address()
    }

    /// Public verifying key for signatures produced by this private key
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey {
            point: SubgroupPoint::generator() * self.sk,
        }
    }

    /// Schnorr-sign arbitrary bytes with a deterministic nonce
    pub fn sign(&self, message: &[u8]) -> Signature {
        let vk = self.verifying_key();
        let r = hash_to_fr(
            SIG_NONCE_PERSONALIZATION,
            Some(&self.sk.to_bytes()),
            &[message],
        );
        let big_r = SubgroupPoint::generator() * r;
        let challenge = hash_to_fr(
            SIG_CHALLENGE_PERSONALIZATION,
            None,
            &[&big_r.to_bytes(), &vk.point.to_bytes(), message],
        );
        let response = r + challenge * self.sk;
        Signature {
            challenge,
            response,
        }
    }
}

/// Detection and decryption authority without spending rights
#[derive(Clone)]
pub struct ViewKey {
    vk: Fr,
}

impl ViewKey {
    /// Parse a bech32-encoded view key (`obscview1...`)
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let bytes = decode_bech32(VIEW_KEY_HRP, encoded)?;
        let vk = Option::from(Fr::from_bytes(&bytes))
            .ok_or_else(|| Error::InvalidKey("View key is not a valid scalar".to_string()))?;
        Ok(Self { vk })
    }

    /// Encode as bech32 (`obscview1...`)
    pub fn encode(&self) -> Result<String> {
        encode_bech32(VIEW_KEY_HRP, &self.vk.to_bytes())
    }

    /// Derive the address for this view key
    pub fn address(&self) -> Address {
        Address {
            point: SubgroupPoint::generator() * self.vk,
        }
    }

    /// Agree with a published nonce point and return the shared x-coordinate.
    ///
    /// This is the receiver half of the ownership tag and record key
    /// derivation; the sender half lives in [`crate::record`].
    pub fn agree_x_bytes(&self, nonce: &ExtendedPoint) -> [u8; 32] {
        point_x_bytes(&agree(&self.vk, nonce))
    }
}

/// Public wallet address (the view key's public point)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Address {
    point: SubgroupPoint,
}

impl Address {
    /// Parse a bech32-encoded address (`obsc1...`)
    pub fn from_encoded(encoded: &str) -> Result<Self> {
        let (hrp, data) = bech32::decode(encoded)
            .map_err(|e| Error::InvalidAddress(format!("Bech32 decode failed: {e}")))?;
        if hrp.as_str() != ADDRESS_HRP {
            return Err(Error::InvalidAddress(format!(
                "Expected HRP {ADDRESS_HRP}, got {}",
                hrp.as_str()
            )));
        }
        let bytes: [u8; 32] = data
            .try_into()
            .map_err(|_| Error::InvalidAddress("Address must be 32 bytes".to_string()))?;
        // SubgroupPoint decoding rejects non-canonical and out-of-subgroup
        // encodings, so a parsed address is always a valid scan target.
        let point = Option::from(SubgroupPoint::from_bytes(&bytes))
            .ok_or_else(|| Error::InvalidAddress("Address is not a valid point".to_string()))?;
        Ok(Self { point })
    }

    /// Encode as bech32 (`obsc1...`)
    pub fn encode(&self) -> Result<String> {
        let hrp = Hrp::parse(ADDRESS_HRP)
            .map_err(|e| Error::InvalidAddress(format!("Invalid HRP: {e}")))?;
        bech32::encode::<Bech32>(hrp, &self.point.to_bytes())
            .map_err(|e| Error::InvalidAddress(format!("Bech32 encode failed: {e}")))
    }

    /// The address point in extended coordinates
    pub fn to_point(&self) -> ExtendedPoint {
        ExtendedPoint::from(self.point)
    }

    /// Affine u-coordinate of the address point (the scanner's comparison key)
    pub fn x_coordinate(&self) -> jubjub::Fq {
        AffinePoint::from(self.to_point()).get_u()
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.encode() {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "<invalid address>"),
        }
    }
}

/// Public key against which signatures verify
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VerifyingKey {
    point: SubgroupPoint,
}

impl VerifyingKey {
    /// Parse from hex
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded)
            .map_err(|e| Error::InvalidKey(format!("Verifying key hex decode failed: {e}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidKey("Verifying key must be 32 bytes".to_string()))?;
        let point = Option::from(SubgroupPoint::from_bytes(&bytes))
            .ok_or_else(|| Error::InvalidKey("Verifying key is not a valid point".to_string()))?;
        Ok(Self { point })
    }

    /// Encode as hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.point.to_bytes())
    }

    /// Verify a Schnorr signature over `message`
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let recovered = SubgroupPoint::generator() * signature.response
            - self.point * signature.challenge;
        let challenge = hash_to_fr(
            SIG_CHALLENGE_PERSONALIZATION,
            None,
            &[&recovered.to_bytes(), &self.point.to_bytes(), message],
        );
        bool::from(challenge.ct_eq(&signature.challenge))
    }
}

/// Schnorr signature in challenge-response form
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature {
    challenge: Fr,
    response: Fr,
}

impl Signature {
    /// Serialize as 64 bytes (challenge then response)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        out[..32].copy_from_slice(&self.challenge.to_bytes());
        out[32..].copy_from_slice(&self.response.to_bytes());
        out
    }

    /// Parse from 64 bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 64] = bytes
            .try_into()
            .map_err(|_| Error::InvalidSignature("Signature must be 64 bytes".to_string()))?;
        let mut challenge_bytes = [0u8; 32];
        challenge_bytes.copy_from_slice(&bytes[..32]);
        let mut response_bytes = [0u8; 32];
        response_bytes.copy_from_slice(&bytes[32..]);
        let challenge = Option::from(Fr::from_bytes(&challenge_bytes))
            .ok_or_else(|| Error::InvalidSignature("Invalid challenge scalar".to_string()))?;
        let response = Option::from(Fr::from_bytes(&response_bytes))
            .ok_or_else(|| Error::InvalidSignature("Invalid response scalar".to_string()))?;
        Ok(Self {
            challenge,
            response,
        })
    }

    /// Encode as hex
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Parse from hex
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let bytes = hex::decode(encoded)
            .map_err(|e| Error::InvalidSignature(format!("Signature hex decode failed: {e}")))?;
        Self::from_bytes(&bytes)
    }
}

/// Sample a fresh ephemeral scalar for record encryption
pub(crate) fn random_scalar() -> Fr {
    Fr::random(rand::rngs::OsRng)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn test_seed() -> Seed {
        Seed::from_mnemonic(TEST_MNEMONIC, "").unwrap()
    }

    #[test]
    fn test_generate_mnemonic_word_counts() {
        for (count, expected) in [(Some(12), 12), (Some(18), 18), (Some(24), 24), (None, 24)] {
            let phrase = Seed::generate_mnemonic(count);
            assert_eq!(phrase.split_whitespace().count(), expected);
            assert!(Seed::validate_mnemonic(&phrase).is_ok());
        }
    }

    #[test]
    fn test_invalid_mnemonic_rejected() {
        assert!(Seed::from_mnemonic("not a mnemonic", "").is_err());
        assert!(Seed::validate_mnemonic("abandon abandon").is_err());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let seed = test_seed();
        let a = PrivateKey::derive(&seed, 0);
        let b = PrivateKey::derive(&seed, 0);
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_eq!(a.address(), b.address());
    }

    #[test]
    fn test_distinct_indices_distinct_addresses() {
        let seed = test_seed();
        let a = PrivateKey::derive(&seed, 0).address();
        let b = PrivateKey::derive(&seed, 1).address();
        assert_ne!(a, b);
    }

    #[test]
    fn test_address_roundtrip() {
        let seed = test_seed();
        let address = PrivateKey::derive(&seed, 3).address();
        let encoded = address.encode().unwrap();
        assert!(encoded.starts_with("obsc1"));
        let decoded = Address::from_encoded(&encoded).unwrap();
        assert_eq!(decoded, address);
    }

    #[test]
    fn test_address_rejects_wrong_hrp() {
        let seed = test_seed();
        let view = PrivateKey::derive(&seed, 0).view_key();
        let encoded = view.encode().unwrap();
        assert!(Address::from_encoded(&encoded).is_err());
    }

    #[test]
    fn test_private_key_roundtrip() {
        let seed = test_seed();
        let key = PrivateKey::derive(&seed, 7);
        let encoded = key.encode().unwrap();
        assert!(encoded.starts_with("obscsk1"));
        let decoded = PrivateKey::from_encoded(&encoded).unwrap();
        assert_eq!(decoded.to_bytes(), key.to_bytes());
        assert_eq!(decoded.address(), key.address());
    }

    #[test]
    fn test_view_key_roundtrip_and_address() {
        let seed = test_seed();
        let key = PrivateKey::derive(&seed, 2);
        let view = key.view_key();
        let encoded = view.encode().unwrap();
        assert!(encoded.starts_with("obscview1"));
        let decoded = ViewKey::from_encoded(&encoded).unwrap();
        assert_eq!(decoded.address(), key.address());
    }

    #[test]
    fn test_sign_and_verify() {
        let seed = test_seed();
        let key = PrivateKey::derive(&seed, 0);
        let vk = key.verifying_key();
        let sig = key.sign(b"hello obscura");
        assert!(vk.verify(b"hello obscura", &sig));
        assert!(!vk.verify(b"hello observer", &sig));
    }

    #[test]
    fn test_signature_rejected_for_other_key() {
        let seed = test_seed();
        let sig = PrivateKey::derive(&seed, 0).sign(b"payload");
        let other = PrivateKey::derive(&seed, 1).verifying_key();
        assert!(!other.verify(b"payload", &sig));
    }

    #[test]
    fn test_signature_hex_roundtrip() {
        let seed = test_seed();
        let key = PrivateKey::derive(&seed, 0);
        let sig = key.sign(b"payload");
        let parsed = Signature::from_hex(&sig.to_hex()).unwrap();
        assert!(key.verifying_key().verify(b"payload", &parsed));
    }

    #[test]
    fn test_agreement_symmetry() {
        // Receiver agreeing with the sender's nonce must match the sender
        // agreeing with the receiver's address.
        let seed = test_seed();
        let view = PrivateKey::derive(&seed, 0).view_key();
        let address = view.address();

        let ephemeral = random_scalar();
        let nonce = ExtendedPoint::from(SubgroupPoint::generator() * ephemeral);

        let receiver_side = view.agree_x_bytes(&nonce);
        let sender_side = point_x_bytes(&agree(&ephemeral, &address.to_point()));
        assert_eq!(receiver_side, sender_side);
    }
}
