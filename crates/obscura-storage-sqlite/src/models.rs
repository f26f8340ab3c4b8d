//! Ledger row models

use obscura_core::{DisplayKind, TransactionKind, TransactionStatus, TransitionStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fully hydrated encrypted record owned by one of the wallet's addresses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Content-derived id, stable across resyncs
    pub id: String,
    /// Chain id
    pub chain: String,
    /// Owning address
    pub address: String,
    /// Program that defines the record type
    pub program_id: String,
    /// Record ciphertext (bech32 `obscrec1...`)
    pub ciphertext: String,
    /// Decrypted amount in microcredits (populated lazily)
    pub microcredits: Option<u64>,
    /// Block height the record was created at
    pub block_height: u32,
    /// Chain transaction id the record was created in
    pub transaction_id: String,
    /// Chain transition id the record was created in
    pub transition_id: String,
    /// Output index within the creating transition
    pub output_index: u32,
    /// Creation block timestamp (unix seconds)
    pub timestamp: i64,
    /// Block height the record was spent at
    pub spent_block_height: Option<u32>,
    /// Chain transaction id that spent the record
    pub spent_transaction_id: Option<String>,
    /// Chain transition id that spent the record
    pub spent_transition_id: Option<String>,
    /// Spend block timestamp (unix seconds)
    pub spent_timestamp: Option<i64>,
    /// Serial number (absent until computed from the plaintext)
    pub serial_number: Option<String>,
    /// Whether the record is spent on-chain
    pub spent: bool,
    /// Whether an in-flight transaction has reserved the record
    pub locked: bool,
    /// Whether local transaction history has been derived from this record
    pub locally_synced_transactions: bool,
}

impl Record {
    /// Whether the record can be selected as a transaction input
    pub fn is_spendable(&self) -> bool {
        !self.spent && !self.locked
    }
}

/// An ownership assertion from the scanner, not yet hydrated into a [`Record`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedRecord {
    /// Row id (`None` until inserted)
    pub id: Option<i64>,
    /// Chain id
    pub chain: String,
    /// Owning address
    pub address: String,
    /// Chain transition id the record was created in
    pub transition_id: String,
    /// Output index within the transition
    pub output_index: u32,
    /// Whether the matching hydrated record exists
    pub synced: bool,
}

impl OwnedRecord {
    /// A fresh unsynced assertion
    pub fn new(
        chain: impl Into<String>,
        address: impl Into<String>,
        transition_id: impl Into<String>,
        output_index: u32,
    ) -> Self {
        Self {
            id: None,
            chain: chain.into(),
            address: address.into(),
            transition_id: transition_id.into(),
            output_index,
            synced: false,
        }
    }
}

/// One function invocation inside a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// Local id (UUID)
    pub id: String,
    /// Chain-side transition id (filled by generation or scanning)
    pub chain_transition_id: Option<String>,
    /// Program id
    pub program_id: String,
    /// Function name
    pub function_name: String,
    /// JSON-encoded function inputs
    pub inputs_json: String,
    /// Transition status
    pub status: TransitionStatus,
    /// Whether this is the fee-payment transition
    pub is_fee: bool,
    /// Ordered consumed record ids
    pub input_record_ids: Vec<String>,
    /// Ordered produced record ids
    pub output_record_ids: Vec<String>,
}

impl Transition {
    /// A queued transition with a fresh local id
    pub fn new(
        program_id: impl Into<String>,
        function_name: impl Into<String>,
        inputs_json: impl Into<String>,
        is_fee: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chain_transition_id: None,
            program_id: program_id.into(),
            function_name: function_name.into(),
            inputs_json: inputs_json.into(),
            status: TransitionStatus::Queued,
            is_fee,
            input_record_ids: Vec::new(),
            output_record_ids: Vec::new(),
        }
    }
}

/// A unit of user intent: one or more transitions plus a fee
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Local id (UUID)
    pub id: String,
    /// Chain-side transaction id (filled after broadcast or reconciliation)
    pub chain_transaction_id: Option<String>,
    /// Chain id
    pub chain: String,
    /// Initiating address
    pub address: String,
    /// Execute, deploy or standalone fee
    pub kind: TransactionKind,
    /// Fee in microcredits
    pub fee: u64,
    /// Serialized authorization payload
    pub authorization: Option<String>,
    /// Serialized fee authorization payload
    pub fee_authorization: Option<String>,
    /// Whether proof generation is delegated to a remote prover
    pub delegated: bool,
    /// Remote prover request id
    pub delegation_request_id: Option<String>,
    /// Generate without broadcasting; terminates at `Finalized`
    pub only_execute: bool,
    /// Display classification for listings
    pub display_kind: DisplayKind,
    /// Lifecycle status
    pub status: TransactionStatus,
    /// Creation time (unix seconds)
    pub created_at: i64,
    /// When processing first started (unix seconds)
    pub processing_started_at: Option<i64>,
    /// When the transaction finalized (unix seconds)
    pub finalized_at: Option<i64>,
    /// Ordered transition ids
    pub transition_ids: Vec<String>,
}

impl Transaction {
    /// A queued transaction with a fresh local id
    pub fn new(
        chain: impl Into<String>,
        address: impl Into<String>,
        kind: TransactionKind,
        display_kind: DisplayKind,
        fee: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chain_transaction_id: None,
            chain: chain.into(),
            address: address.into(),
            kind,
            fee,
            authorization: None,
            fee_authorization: None,
            delegated: false,
            delegation_request_id: None,
            only_execute: false,
            display_kind,
            status: TransactionStatus::Queued,
            created_at: chrono::Utc::now().timestamp(),
            processing_started_at: None,
            finalized_at: None,
            transition_ids: Vec::new(),
        }
    }
}

/// A scanned-range checkpoint for one (chain, address)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSync {
    /// Row id (`None` until inserted)
    pub id: Option<i64>,
    /// Chain id
    pub chain: String,
    /// Address the range was scanned for
    pub address: String,
    /// Start block, inclusive
    pub start_block: u32,
    /// End block, exclusive
    pub end_block: u32,
    /// Last fully processed candidate page
    pub page: u32,
    /// Whether the whole range has been scanned
    pub range_complete: bool,
    /// Last update time (RFC 3339)
    pub updated_at: String,
}

/// Per-address cycle bookkeeping: the height the last sync cycle reached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicSync {
    /// Row id (`None` until inserted)
    pub id: Option<i64>,
    /// Chain id
    pub chain: String,
    /// Address
    pub address: String,
    /// Height the last completed cycle synced to
    pub last_synced_block: u32,
    /// Last update time (RFC 3339)
    pub updated_at: String,
}

/// Spendable / pending / total balance for one (chain, address)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// Unspent and unlocked microcredits
    pub spendable: u64,
    /// Unspent but locked by an in-flight transaction
    pub pending: u64,
    /// All unspent microcredits
    pub total: u64,
}
