//! Messaging bridge
//!
//! Serde request/response types for embedders that expose the wallet to an
//! external surface (browser extension, dapp page), plus the dispatcher
//! and the origin-keyed permission registry it consults. Every request
//! carries the requesting origin; everything except `connect` requires a
//! prior grant. Transport is the embedder's problem.

use crate::lifecycle::{LifecycleManager, TransferRequest};
use crate::{Error, Result};
use obscura_core::RecordCiphertext;
use obscura_storage_sqlite::{Balance, Ledger, Record};
use obscura_vault::Vault;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A request arriving over the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeRequest {
    /// Request a grant for this origin
    Connect {
        /// Requesting origin
        origin: String,
    },
    /// Sign arbitrary bytes with an account key
    Sign {
        /// Requesting origin
        origin: String,
        /// Signing address
        address: String,
        /// Hex-encoded message bytes
        message: String,
    },
    /// Decrypt a record ciphertext
    Decrypt {
        /// Requesting origin
        origin: String,
        /// Owning address
        address: String,
        /// Bech32 record ciphertext
        ciphertext: String,
    },
    /// List an address's records and balance
    Records {
        /// Requesting origin
        origin: String,
        /// Chain id
        chain: String,
        /// Address
        address: String,
    },
    /// Queue a transfer
    ExecuteTransaction {
        /// Requesting origin
        origin: String,
        /// The transfer to queue
        transfer: TransferRequest,
    },
    /// Look up a transaction's lifecycle status
    TransactionStatus {
        /// Requesting origin
        origin: String,
        /// Local transaction id
        transaction_id: String,
    },
}

impl BridgeRequest {
    /// The origin making this request
    pub fn origin(&self) -> &str {
        match self {
            BridgeRequest::Connect { origin }
            | BridgeRequest::Sign { origin, .. }
            | BridgeRequest::Decrypt { origin, .. }
            | BridgeRequest::Records { origin, .. }
            | BridgeRequest::ExecuteTransaction { origin, .. }
            | BridgeRequest::TransactionStatus { origin, .. } => origin,
        }
    }
}

/// A response leaving over the bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeResponse {
    /// Grant result for a `connect` request
    Connected {
        /// The granted origin
        origin: String,
    },
    /// A signature over the requested bytes
    Signature {
        /// Bech32 signature
        signature: String,
    },
    /// A decrypted record
    Decrypted {
        /// Record plaintext as JSON
        plaintext: String,
    },
    /// Records and balance for an address
    Records {
        /// The address's records
        records: Vec<Record>,
        /// Spendable / pending / total balance
        balance: Balance,
    },
    /// A queued transaction
    TransactionQueued {
        /// Local transaction id
        transaction_id: String,
    },
    /// A transaction's current status
    TransactionStatus {
        /// Local transaction id
        transaction_id: String,
        /// Lifecycle status string
        status: String,
        /// Chain transaction id, when known
        chain_transaction_id: Option<String>,
    },
}

/// In-memory origin-keyed grants
#[derive(Default)]
pub struct PermissionRegistry {
    grants: RwLock<HashMap<String, i64>>,
}

impl PermissionRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant the origin, recording when
    pub fn grant(&self, origin: &str) {
        self.grants
            .write()
            .insert(origin.to_string(), chrono::Utc::now().timestamp());
        tracing::info!(origin, "origin granted");
    }

    /// Remove the origin's grant
    pub fn revoke(&self, origin: &str) {
        self.grants.write().remove(origin);
        tracing::info!(origin, "origin revoked");
    }

    /// Whether the origin holds a grant
    pub fn is_granted(&self, origin: &str) -> bool {
        self.grants.read().contains_key(origin)
    }

    /// Granted origins, unordered
    pub fn granted_origins(&self) -> Vec<String> {
        self.grants.read().keys().cloned().collect()
    }
}

/// Dispatches bridge requests against the engine
pub struct Bridge {
    vault: Arc<Vault>,
    ledger: Arc<Ledger>,
    lifecycle: Arc<LifecycleManager>,
    permissions: PermissionRegistry,
}

impl Bridge {
    /// A bridge over shared engine handles
    pub fn new(vault: Arc<Vault>, ledger: Arc<Ledger>, lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            vault,
            ledger,
            lifecycle,
            permissions: PermissionRegistry::new(),
        }
    }

    /// The grant registry, for embedder-side permission management
    pub fn permissions(&self) -> &PermissionRegistry {
        &self.permissions
    }

    /// Handle one request. Everything except `connect` requires the
    /// origin to hold a grant.
    pub fn handle(&self, request: &BridgeRequest) -> Result<BridgeResponse> {
        if let BridgeRequest::Connect { origin } = request {
            self.permissions.grant(origin);
            return Ok(BridgeResponse::Connected {
                origin: origin.clone(),
            });
        }
        if !self.permissions.is_granted(request.origin()) {
            return Err(Error::PermissionDenied(request.origin().to_string()));
        }

        match request {
            BridgeRequest::Connect { .. } => unreachable!("handled above"),
            BridgeRequest::Sign {
                address, message, ..
            } => {
                let bytes = hex::decode(message)
                    .map_err(|_| Error::InvalidRequest("message is not hex".to_string()))?;
                let signature = self.vault.sign(address, &bytes)?;
                Ok(BridgeResponse::Signature {
                    signature: signature.to_hex(),
                })
            }
            BridgeRequest::Decrypt {
                address,
                ciphertext,
                ..
            } => {
                let ciphertext = RecordCiphertext::from_encoded(ciphertext)?;
                let plaintext = self.vault.decrypt_record(address, &ciphertext)?;
                Ok(BridgeResponse::Decrypted {
                    plaintext: plaintext.to_json(),
                })
            }
            BridgeRequest::Records { chain, address, .. } => Ok(BridgeResponse::Records {
                records: self.ledger.list_records(chain, address)?,
                balance: self.ledger.balance(chain, address)?,
            }),
            BridgeRequest::ExecuteTransaction { transfer, .. } => {
                let transaction = self.lifecycle.create_transfer(transfer)?;
                Ok(BridgeResponse::TransactionQueued {
                    transaction_id: transaction.id,
                })
            }
            BridgeRequest::TransactionStatus { transaction_id, .. } => {
                let transaction = self
                    .ledger
                    .get_transaction(transaction_id)
                    .map_err(|_| Error::UnknownTransaction(transaction_id.clone()))?;
                Ok(BridgeResponse::TransactionStatus {
                    transaction_id: transaction.id,
                    status: transaction.status.as_str().to_string(),
                    chain_transaction_id: transaction.chain_transaction_id,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleConfig;
    use crate::prover::ProverCache;
    use obscura_core::{PrivateKey, RecordPlaintext, Seed, CREDITS_PROGRAM};
    use obscura_sync::{ChainGateway, MockGateway};

    const CHAIN: &str = "obscura-testnet";
    const ORIGIN: &str = "https://dapp.example";
    const PASSWORD: &str = "correct-horse-battery-staple-9";
    const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    struct Fixture {
        _dir: tempfile::TempDir,
        bridge: Bridge,
        ledger: Arc<Ledger>,
        address: String,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let vault = Arc::new(Vault::open(dir.path().join("vault.json")).unwrap());
        vault.initialize(PASSWORD, Some(TEST_MNEMONIC)).unwrap();
        // Initialization derives the first account, at index 0.
        let address = vault.list_accounts().unwrap()[0].address.clone();

        let ledger = Arc::new(Ledger::open_in_memory().unwrap());
        let prover =
            Arc::new(ProverCache::new(dir.path().join("prover"), "http://localhost:9").unwrap());
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&ledger),
            Arc::clone(&vault),
            Arc::new(MockGateway::new()) as Arc<dyn ChainGateway>,
            prover,
            LifecycleConfig::default(),
        ));
        let bridge = Bridge::new(vault, Arc::clone(&ledger), lifecycle);
        Fixture {
            _dir: dir,
            bridge,
            ledger,
            address,
        }
    }

    fn connect(fx: &Fixture) {
        let response = fx
            .bridge
            .handle(&BridgeRequest::Connect {
                origin: ORIGIN.to_string(),
            })
            .unwrap();
        assert!(matches!(response, BridgeResponse::Connected { .. }));
    }

    fn seed_record(fx: &Fixture, id: &str, microcredits: u64) {
        fx.ledger
            .insert_record(&Record {
                id: id.to_string(),
                chain: CHAIN.to_string(),
                address: fx.address.clone(),
                program_id: CREDITS_PROGRAM.to_string(),
                ciphertext: format!("obscrec1{id}"),
                microcredits: Some(microcredits),
                block_height: 10,
                transaction_id: format!("at1{id}"),
                transition_id: format!("otn1{id}"),
                output_index: 0,
                timestamp: 1_700_000_000,
                spent_block_height: None,
                spent_transaction_id: None,
                spent_transition_id: None,
                spent_timestamp: None,
                serial_number: None,
                spent: false,
                locked: false,
                locally_synced_transactions: true,
            })
            .unwrap();
    }

    #[test]
    fn test_ungrant_origin_is_denied() {
        let fx = fixture();
        let err = fx
            .bridge
            .handle(&BridgeRequest::Records {
                origin: ORIGIN.to_string(),
                chain: CHAIN.to_string(),
                address: fx.address.clone(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(origin) if origin == ORIGIN));
    }

    #[test]
    fn test_connect_grants_and_revoke_removes() {
        let fx = fixture();
        connect(&fx);
        assert!(fx.bridge.permissions().is_granted(ORIGIN));

        fx.bridge.permissions().revoke(ORIGIN);
        let err = fx
            .bridge
            .handle(&BridgeRequest::Sign {
                origin: ORIGIN.to_string(),
                address: fx.address.clone(),
                message: "00".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::PermissionDenied(_)));
    }

    #[test]
    fn test_sign_returns_encoded_signature() {
        let fx = fixture();
        connect(&fx);
        let response = fx
            .bridge
            .handle(&BridgeRequest::Sign {
                origin: ORIGIN.to_string(),
                address: fx.address.clone(),
                message: hex::encode(b"bridge message"),
            })
            .unwrap();
        let BridgeResponse::Signature { signature } = response else {
            panic!("expected signature response");
        };
        assert!(!signature.is_empty());
    }

    #[test]
    fn test_sign_rejects_non_hex_message() {
        let fx = fixture();
        connect(&fx);
        let err = fx
            .bridge
            .handle(&BridgeRequest::Sign {
                origin: ORIGIN.to_string(),
                address: fx.address.clone(),
                message: "not hex!".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[test]
    fn test_decrypt_roundtrip() {
        let fx = fixture();
        connect(&fx);

        let seed = Seed::from_mnemonic(TEST_MNEMONIC, "").unwrap();
        let owner = PrivateKey::derive(&seed, 0).address();
        let plaintext = RecordPlaintext::new(&owner, 42_000).unwrap();
        let (ciphertext, _) = RecordCiphertext::seal(&owner, &plaintext).unwrap();

        let response = fx
            .bridge
            .handle(&BridgeRequest::Decrypt {
                origin: ORIGIN.to_string(),
                address: fx.address.clone(),
                ciphertext: ciphertext.encode().unwrap(),
            })
            .unwrap();
        let BridgeResponse::Decrypted { plaintext } = response else {
            panic!("expected decrypted response");
        };
        assert!(plaintext.contains("42000"));
    }

    #[test]
    fn test_records_lists_with_balance() {
        let fx = fixture();
        connect(&fx);
        seed_record(&fx, "r1", 700);
        seed_record(&fx, "r2", 300);

        let response = fx
            .bridge
            .handle(&BridgeRequest::Records {
                origin: ORIGIN.to_string(),
                chain: CHAIN.to_string(),
                address: fx.address.clone(),
            })
            .unwrap();
        let BridgeResponse::Records { records, balance } = response else {
            panic!("expected records response");
        };
        assert_eq!(records.len(), 2);
        assert_eq!(balance.spendable, 1_000);
    }

    #[test]
    fn test_execute_transaction_queues_transfer() {
        let fx = fixture();
        connect(&fx);
        seed_record(&fx, "r1", 5_000);
        seed_record(&fx, "r2", 100);

        let response = fx
            .bridge
            .handle(&BridgeRequest::ExecuteTransaction {
                origin: ORIGIN.to_string(),
                transfer: TransferRequest {
                    chain: CHAIN.to_string(),
                    address: fx.address.clone(),
                    recipient: "obsc1recipient".to_string(),
                    amount: 2_000,
                    fee: 50,
                    delegated: false,
                    only_execute: false,
                },
            })
            .unwrap();
        let BridgeResponse::TransactionQueued { transaction_id } = response else {
            panic!("expected queued response");
        };

        let status = fx
            .bridge
            .handle(&BridgeRequest::TransactionStatus {
                origin: ORIGIN.to_string(),
                transaction_id,
            })
            .unwrap();
        let BridgeResponse::TransactionStatus { status, .. } = status else {
            panic!("expected status response");
        };
        assert_eq!(status, "queued");
    }

    #[test]
    fn test_unknown_transaction_is_explicit() {
        let fx = fixture();
        connect(&fx);
        let err = fx
            .bridge
            .handle(&BridgeRequest::TransactionStatus {
                origin: ORIGIN.to_string(),
                transaction_id: "no-such-id".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::UnknownTransaction(id) if id == "no-such-id"));
    }

    #[test]
    fn test_request_serde_shape() {
        let request = BridgeRequest::Connect {
            origin: ORIGIN.to_string(),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"type\":\"connect\""));
        let parsed: BridgeRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.origin(), ORIGIN);
    }
}
