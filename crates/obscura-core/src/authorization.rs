//! Transition authorizations
//!
//! An authorization is the offline-signed commitment to one transition:
//! program, function, ordered inputs and the signer's identity. It is
//! produced by the vault at build time and consumed later by the execution
//! or delegation path, so signing never depends on network availability.

use crate::keys::{hash_256, PrivateKey, Signature, VerifyingKey};
use crate::{Error, Result};
use bech32::{Bech32, Hrp};
use serde::{Deserialize, Serialize};

/// Bech32 HRP for authorization transition ids
pub const TRANSITION_ID_HRP: &str = "otn";

const AUTH_DIGEST_PERSONALIZATION: &[u8; 16] = b"Obscura_AuthDig_";

/// A signed transition authorization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Authorization-scoped transition id (`otn1...`)
    #[serde(rename = "transitionId")]
    pub transition_id: String,
    /// Program the function belongs to
    #[serde(rename = "programId")]
    pub program_id: String,
    /// Function being invoked
    #[serde(rename = "functionName")]
    pub function_name: String,
    /// Ordered function inputs
    pub inputs: Vec<serde_json::Value>,
    /// Signer address
    pub signer: String,
    /// Hex verifying key matching the signature
    #[serde(rename = "verifyingKey")]
    pub verifying_key: String,
    /// Hex Schnorr signature over the digest
    pub signature: String,
    /// Whether this authorizes the fee transition
    #[serde(rename = "isFee")]
    pub is_fee: bool,
}

impl Authorization {
    /// Build and sign an authorization.
    pub fn build(
        private_key: &PrivateKey,
        program_id: &str,
        function_name: &str,
        inputs: Vec<serde_json::Value>,
        is_fee: bool,
    ) -> Result<Self> {
        let signer = private_key.address().encode()?;
        let inputs_json = serde_json::to_string(&inputs)?;

        let mut salt = [0u8; 16];
        use rand::RngCore;
        rand::thread_rng().fill_bytes(&mut salt);
        let id_digest = hash_256(
            AUTH_DIGEST_PERSONALIZATION,
            None,
            &[
                program_id.as_bytes(),
                function_name.as_bytes(),
                inputs_json.as_bytes(),
                signer.as_bytes(),
                &salt,
            ],
        );
        let hrp = Hrp::parse(TRANSITION_ID_HRP)
            .map_err(|e| Error::InvalidSignature(format!("Invalid HRP: {e}")))?;
        let transition_id = bech32::encode::<Bech32>(hrp, &id_digest)
            .map_err(|e| Error::InvalidSignature(format!("Bech32 encode failed: {e}")))?;

        let mut authorization = Self {
            transition_id,
            program_id: program_id.to_string(),
            function_name: function_name.to_string(),
            inputs,
            signer,
            verifying_key: private_key.verifying_key().to_hex(),
            signature: String::new(),
            is_fee,
        };
        let digest = authorization.digest()?;
        authorization.signature = private_key.sign(&digest).to_hex();
        Ok(authorization)
    }

    /// Digest all signature-covered fields
    pub fn digest(&self) -> Result<[u8; 32]> {
        let inputs_json = serde_json::to_string(&self.inputs)?;
        Ok(hash_256(
            AUTH_DIGEST_PERSONALIZATION,
            None,
            &[
                self.transition_id.as_bytes(),
                self.program_id.as_bytes(),
                self.function_name.as_bytes(),
                inputs_json.as_bytes(),
                self.signer.as_bytes(),
                &[self.is_fee as u8],
            ],
        ))
    }

    /// Verify the embedded signature against the embedded verifying key
    pub fn verify(&self) -> Result<()> {
        let digest = self.digest()?;
        let verifying_key = VerifyingKey::from_hex(&self.verifying_key)?;
        let signature = Signature::from_hex(&self.signature)?;
        if verifying_key.verify(&digest, &signature) {
            Ok(())
        } else {
            Err(Error::InvalidSignature(
                "authorization signature does not verify".to_string(),
            ))
        }
    }

    /// Serialize for persistence on the transaction row
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a persisted authorization
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A main authorization and its fee counterpart, produced together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationPair {
    /// The primary transition authorization
    pub authorization: Authorization,
    /// The fee transition authorization
    pub fee_authorization: Authorization,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Seed;
    use serde_json::json;

    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn private_key() -> PrivateKey {
        let seed = Seed::from_mnemonic(TEST_MNEMONIC, "").unwrap();
        PrivateKey::derive(&seed, 0)
    }

    fn sample_inputs() -> Vec<serde_json::Value> {
        vec![
            json!("obscrec1inputrecord"),
            json!("obsc1recipient"),
            json!("1500000u64"),
        ]
    }

    #[test]
    fn test_build_and_verify() {
        let auth = Authorization::build(
            &private_key(),
            "credits.obs",
            "transfer_private",
            sample_inputs(),
            false,
        )
        .unwrap();

        assert!(auth.transition_id.starts_with("otn1"));
        assert_eq!(auth.program_id, "credits.obs");
        assert!(!auth.is_fee);
        auth.verify().unwrap();
    }

    #[test]
    fn test_tampered_authorization_fails_verification() {
        let mut auth = Authorization::build(
            &private_key(),
            "credits.obs",
            "transfer_private",
            sample_inputs(),
            false,
        )
        .unwrap();
        auth.inputs[2] = json!("9999999u64");
        assert!(auth.verify().is_err());
    }

    #[test]
    fn test_fee_flag_is_signed() {
        let mut auth = Authorization::build(
            &private_key(),
            "credits.obs",
            "fee_private",
            sample_inputs(),
            true,
        )
        .unwrap();
        auth.verify().unwrap();
        auth.is_fee = false;
        assert!(auth.verify().is_err());
    }

    #[test]
    fn test_json_roundtrip() {
        let auth = Authorization::build(
            &private_key(),
            "credits.obs",
            "transfer_private",
            sample_inputs(),
            false,
        )
        .unwrap();
        let json = auth.to_json().unwrap();
        let parsed = Authorization::from_json(&json).unwrap();
        assert_eq!(parsed, auth);
        parsed.verify().unwrap();
    }

    #[test]
    fn test_transition_ids_are_unique() {
        let a = Authorization::build(
            &private_key(),
            "credits.obs",
            "transfer_private",
            sample_inputs(),
            false,
        )
        .unwrap();
        let b = Authorization::build(
            &private_key(),
            "credits.obs",
            "transfer_private",
            sample_inputs(),
            false,
        )
        .unwrap();
        assert_ne!(a.transition_id, b.transition_id);
    }
}
