//! Synchronization pipeline for the Obscura wallet engine
//!
//! Everything between the chain and the local ledger lives here: the
//! [`ChainGateway`] trait and its HTTP client, the planner that turns
//! checkpoints into pending block ranges, the ownership scanner, the record
//! completion pass, the serial-number spend tracker, and the [`Autosync`]
//! supervisor that drives them in order for as long as the wallet stays
//! unlocked.
//!
//! The ledger is the only shared state; each pass reads its work from it
//! and writes results back, so a crash at any point resumes from persisted
//! checkpoints rather than in-memory progress.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod autosync;
pub mod cancel;
pub mod completion;
pub mod error;
pub mod gateway;
pub mod mock;
pub mod planner;
pub mod scanner;
pub mod spent;

pub use autosync::{Autosync, AutosyncConfig, CycleHook, CycleOutcome, WalletSnapshot};
pub use cancel::CancelToken;
pub use completion::{complete_records, derive_history, CompletionOutcome, ProgramCache};
pub use error::{Error, Result};
pub use gateway::{
    ChainGateway, DelegatedState, DelegatedStatus, DelegationRequest, ExecutionRequest,
    ExecutionResponse, HttpGateway, RecordInfo, RetryConfig, SerialNumberStatus,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use mock::MockGateway;
pub use planner::{plan_steps, SyncStep};
pub use scanner::{scan_step, ScanOutcome};
pub use spent::{track_spent, SpentOutcome};
