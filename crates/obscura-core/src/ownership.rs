//! Ownership-candidate checking
//!
//! The chain publishes, for every record output, a nonce point and a blinded
//! owner tag. A wallet recognizes its own outputs by removing the blinding
//! with its view key and comparing the residue against the address
//! x-coordinate. The check never touches the ciphertext, which keeps the
//! scan loop cheap; hydration happens later in record completion.

use crate::keys::{agree, hash_256, point_x_bytes, Address, ViewKey};
use crate::{Error, Result};
use group::ff::PrimeField;
use jubjub::{AffinePoint, ExtendedPoint, Fq};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

const OWNER_TAG_PERSONALIZATION: &[u8; 16] = b"Obscura_OwnerTag";

/// Wire form of one record-output candidate, as served by the chain gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipCandidate {
    /// Affine u-coordinate of the published nonce point (hex)
    #[serde(rename = "nonceX")]
    pub nonce_x: String,
    /// Affine v-coordinate of the published nonce point (hex)
    #[serde(rename = "nonceY")]
    pub nonce_y: String,
    /// Blinded owner tag (hex field element)
    #[serde(rename = "ownerX")]
    pub owner_x: String,
    /// Transition that produced the output
    #[serde(rename = "transitionId")]
    pub transition_id: String,
    /// Output position within the transition
    #[serde(rename = "outputIndex")]
    pub output_index: u32,
}

/// A candidate with its curve elements parsed and validated
#[derive(Debug, Clone)]
pub struct CandidatePoint {
    /// Published nonce point
    pub nonce: ExtendedPoint,
    /// Blinded owner tag
    pub owner_x: Fq,
}

fn parse_fq(label: &str, hex_str: &str) -> Result<Fq> {
    let bytes = hex::decode(hex_str)
        .map_err(|e| Error::InvalidCandidate(format!("{label} hex decode failed: {e}")))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::InvalidCandidate(format!("{label} must be 32 bytes")))?;
    Option::from(Fq::from_bytes(&bytes))
        .ok_or_else(|| Error::InvalidCandidate(format!("{label} is not a field element")))
}

impl OwnershipCandidate {
    /// Parse and validate the candidate's curve elements.
    ///
    /// The nonce is transmitted as an affine coordinate pair. It is
    /// revalidated by recompressing (v with the sign bit of u) and
    /// round-tripping the canonical point decoder, which rejects
    /// off-curve pairs.
    pub fn decode(&self) -> Result<CandidatePoint> {
        let u = parse_fq("nonceX", &self.nonce_x)?;
        let v = parse_fq("nonceY", &self.nonce_y)?;
        let owner_x = parse_fq("ownerX", &self.owner_x)?;

        let mut compressed = v.to_bytes();
        if bool::from(u.is_odd()) {
            compressed[31] |= 0x80;
        }
        let point: AffinePoint = Option::from(AffinePoint::from_bytes(compressed))
            .ok_or_else(|| Error::InvalidCandidate("nonce is not on the curve".to_string()))?;
        if point.get_u() != u {
            return Err(Error::InvalidCandidate(
                "nonce coordinates are inconsistent".to_string(),
            ));
        }

        Ok(CandidatePoint {
            nonce: ExtendedPoint::from(point),
            owner_x,
        })
    }
}

/// Blinding mask over a shared-secret x-coordinate
pub(crate) fn owner_mask(shared_x: &[u8; 32]) -> Fq {
    let digest = hash_256(OWNER_TAG_PERSONALIZATION, None, &[shared_x]);
    let mut wide = [0u8; 64];
    wide[..32].copy_from_slice(&digest);
    Fq::from_bytes_wide(&wide)
}

/// Sender half of the owner tag: blind the recipient x-coordinate
pub(crate) fn blind_owner_x(address: &Address, shared_x: &[u8; 32]) -> Fq {
    address.x_coordinate() + owner_mask(shared_x)
}

/// One address's scanning state: the view key plus the derived x-coordinate,
/// computed once per scan rather than per candidate
#[derive(Clone)]
pub struct ScanKey {
    address: Address,
    address_x: Fq,
    view_key: ViewKey,
}

impl ScanKey {
    /// Build a scan key for an address and its view key
    pub fn new(address: Address, view_key: ViewKey) -> Self {
        let address_x = address.x_coordinate();
        Self {
            address,
            address_x,
            view_key,
        }
    }

    /// The address this key scans for
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Constant-time ownership check against a parsed candidate
    pub fn is_owner(&self, candidate: &CandidatePoint) -> bool {
        let shared_x = self.view_key.agree_x_bytes(&candidate.nonce);
        let unblinded = candidate.owner_x - owner_mask(&shared_x);
        bool::from(unblinded.ct_eq(&self.address_x))
    }
}

/// Scratch used by tests and record sealing to fabricate valid candidates
pub(crate) fn candidate_parts(
    address: &Address,
    ephemeral: &jubjub::Fr,
) -> (ExtendedPoint, Fq) {
    use group::Group;
    let nonce = ExtendedPoint::from(jubjub::SubgroupPoint::generator() * ephemeral);
    let shared_x = point_x_bytes(&agree(ephemeral, &address.to_point()));
    (nonce, blind_owner_x(address, &shared_x))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{PrivateKey, Seed};

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn scan_key(index: u32) -> ScanKey {
        let seed = Seed::from_mnemonic(TEST_MNEMONIC, "").unwrap();
        let key = PrivateKey::derive(&seed, index);
        ScanKey::new(key.address(), key.view_key())
    }

    fn candidate_for(address: &Address) -> OwnershipCandidate {
        let ephemeral = crate::keys::random_scalar();
        let (nonce, owner_x) = candidate_parts(address, &ephemeral);
        let affine = AffinePoint::from(nonce);
        OwnershipCandidate {
            nonce_x: hex::encode(affine.get_u().to_bytes()),
            nonce_y: hex::encode(affine.get_v().to_bytes()),
            owner_x: hex::encode(owner_x.to_bytes()),
            transition_id: "otn1candidate".to_string(),
            output_index: 0,
        }
    }

    #[test]
    fn test_owner_recognizes_own_candidate() {
        let key = scan_key(0);
        let candidate = candidate_for(key.address()).decode().unwrap();
        assert!(key.is_owner(&candidate));
    }

    #[test]
    fn test_foreign_candidate_rejected() {
        let mine = scan_key(0);
        let theirs = scan_key(1);
        let candidate = candidate_for(theirs.address()).decode().unwrap();
        assert!(!mine.is_owner(&candidate));
    }

    #[test]
    fn test_decode_rejects_off_curve_nonce() {
        let key = scan_key(0);
        let mut candidate = candidate_for(key.address());
        // A v-coordinate that with this u does not land on the curve.
        candidate.nonce_y = hex::encode([7u8; 32]);
        assert!(candidate.decode().is_err());
    }

    #[test]
    fn test_decode_rejects_bad_hex() {
        let key = scan_key(0);
        let mut candidate = candidate_for(key.address());
        candidate.owner_x = "zz".repeat(32);
        assert!(candidate.decode().is_err());

        let mut candidate = candidate_for(key.address());
        candidate.nonce_x = "ab".to_string();
        assert!(candidate.decode().is_err());
    }

    #[test]
    fn test_tampered_owner_tag_rejected() {
        let key = scan_key(0);
        let candidate = candidate_for(key.address());
        let mut parsed = candidate.decode().unwrap();
        parsed.owner_x += Fq::one();
        assert!(!key.is_owner(&parsed));
    }
}
