//! Obscura wallet service
//!
//! The embedding surface of the wallet engine. This crate assembles the
//! vault, ledger, gateway and sync pipeline into a [`WalletService`], and
//! adds the pieces that sit above sync: the transaction [`lifecycle`]
//! manager, the [`prover`] artifact cache, the messaging [`bridge`] with
//! its permission registry, and [`logging`] initialization.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod prover;
pub mod service;

pub use bridge::{Bridge, BridgeRequest, BridgeResponse, PermissionRegistry};
pub use error::{Error, Result};
pub use lifecycle::{LifecycleConfig, LifecycleManager, TransferRequest};
pub use logging::{init as init_logging, LogFormat};
pub use prover::ProverCache;
pub use service::{ChainConfig, WalletService};
