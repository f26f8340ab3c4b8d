//! Database connection and initialization

use crate::{migrations, Result};
use rusqlite::{Connection, OpenFlags, TransactionBehavior};
use std::path::Path;

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the ledger database at `path` and bring its schema
    /// up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        // Enable WAL mode
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
        // Join-table rows may reference output records that are not hydrated
        // yet, so declarative foreign keys are not used.
        conn.execute_batch("PRAGMA foreign_keys=OFF;")?;

        migrations::run_migrations(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database (tests and throwaway state).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }

    /// Get connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a write transaction.
    ///
    /// `BEGIN IMMEDIATE` semantics: the write lock is taken up front so a
    /// multi-statement update never fails halfway on lock escalation.
    pub fn transaction(&mut self) -> Result<rusqlite::Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }
}
