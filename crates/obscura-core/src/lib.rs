//! Obscura wallet engine core
//!
//! This crate implements the chain-agnostic domain of the wallet engine:
//! key derivation and addresses, the ownership-tag check used by the
//! scanner, record encryption and serial numbers, program record-type
//! parsing, input selection, and the transaction status machine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod authorization;
pub mod classify;
pub mod error;
pub mod keys;
pub mod ownership;
pub mod program;
pub mod record;
pub mod selection;
pub mod status;
pub mod units;

pub use authorization::{Authorization, AuthorizationPair};
pub use classify::{classify, DisplayKind, CREDITS_PROGRAM};
pub use error::{Error, ErrorCategory, Result};
pub use keys::{
    Address, PrivateKey, Seed, Signature, VerifyingKey, ViewKey, ADDRESS_HRP, PRIVATE_KEY_HRP,
    VIEW_KEY_HRP,
};
pub use ownership::{CandidatePoint, OwnershipCandidate, ScanKey};
pub use program::{Program, RecordField, RecordType};
pub use record::{record_id, serial_number, RecordCiphertext, RecordPlaintext, RECORD_HRP};
pub use selection::{InputSelector, SelectableRecord, SelectionResult};
pub use status::{TransactionKind, TransactionStatus, TransitionStatus};
pub use units::{format_microcredits, parse_credits, MICROCREDITS_PER_CREDIT};
