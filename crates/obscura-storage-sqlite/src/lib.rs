//! SQLite persistence for the Obscura wallet ledger
//!
//! All durable wallet state lives here behind a single [`Ledger`] facade:
//! decrypted records, transactions and their transitions, join tables, and
//! the sync checkpoints the scanner resumes from. The database is plaintext
//! by design; key material never reaches it and stays in the sealed vault
//! file.
//!
//! ## Invariants enforced at this layer
//!
//! - A record is `locked` exactly while a non-terminal transaction
//!   references it as an input. Locks are taken and released inside the
//!   same database transaction as the status change they belong to.
//! - A transaction in a terminal status (`finalized`, `rejected`, `failed`)
//!   never changes status again.
//! - Re-inserting a record that already exists never overwrites its spend,
//!   lock or serial-number state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod database;
pub mod error;
pub mod ledger;
pub mod migrations;
pub mod models;
pub mod records;
pub mod syncs;
pub mod transactions;

pub use database::Database;
pub use error::{Error, Result};
pub use ledger::Ledger;
pub use models::*;
pub use syncs::{BASE_BACKOFF_MS, MAX_BACKOFF_MS, MAX_BUSY_RETRIES};
