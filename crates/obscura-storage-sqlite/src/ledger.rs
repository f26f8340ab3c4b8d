//! Shared handle over the ledger database
//!
//! The [`Ledger`] is the single source of truth every component reads from
//! and writes to. It serializes access through a mutex held only for the
//! duration of a synchronous statement, never across an await point; the
//! operations themselves live in the `records`, `transactions` and `syncs`
//! modules.

use crate::{Database, Result};
use parking_lot::{Mutex, MutexGuard};
use std::path::Path;

/// Thread-safe handle over the ledger database
pub struct Ledger {
    pub(crate) db: Mutex<Database>,
}

impl Ledger {
    /// Open (or create) the ledger at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Database::open(path)?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Open an in-memory ledger (tests and throwaway state).
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db: Mutex::new(db) })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock()
    }
}
