//! Sync checkpoint storage with retry/backoff for SQLITE_BUSY
//!
//! Checkpoint rows are written after every scanned page, so contention with
//! a concurrent writer is handled here with automatic retry rather than
//! surfaced to the scanner.

use crate::models::{PublicSync, RecordSync};
use crate::{Error, Ledger, Result};
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::thread;
use std::time::Duration;

/// Maximum retry attempts for SQLITE_BUSY
pub const MAX_BUSY_RETRIES: u32 = 5;

/// Base backoff duration in milliseconds
pub const BASE_BACKOFF_MS: u64 = 50;

/// Maximum backoff duration in milliseconds
pub const MAX_BACKOFF_MS: u64 = 1000;

fn sync_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordSync> {
    Ok(RecordSync {
        id: row.get(0)?,
        chain: row.get(1)?,
        address: row.get(2)?,
        start_block: row.get(3)?,
        end_block: row.get(4)?,
        page: row.get(5)?,
        range_complete: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

impl Ledger {
    /// All checkpoints for one (chain, address), sorted by range start
    pub fn record_syncs(&self, chain: &str, address: &str) -> Result<Vec<RecordSync>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(
            "SELECT id, chain, address, start_block, end_block, page, range_complete, updated_at \
             FROM record_syncs \
             WHERE chain = ?1 AND address = ?2 \
             ORDER BY start_block",
        )?;
        let syncs = stmt
            .query_map(params![chain, address], sync_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(syncs)
    }

    /// Completed checkpoints only: the planner's coverage set.
    ///
    /// Provisional rows are resume hints for the scanner, not coverage.
    pub fn complete_record_syncs(&self, chain: &str, address: &str) -> Result<Vec<RecordSync>> {
        let db = self.lock();
        let mut stmt = db.conn().prepare(
            "SELECT id, chain, address, start_block, end_block, page, range_complete, updated_at \
             FROM record_syncs \
             WHERE chain = ?1 AND address = ?2 AND range_complete = 1 \
             ORDER BY start_block",
        )?;
        let syncs = stmt
            .query_map(params![chain, address], sync_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(syncs)
    }

    /// Insert or update a checkpoint, with retry on SQLITE_BUSY
    pub fn upsert_record_sync(
        &self,
        chain: &str,
        address: &str,
        start_block: u32,
        end_block: u32,
        page: u32,
        range_complete: bool,
    ) -> Result<()> {
        execute_with_retry(|| {
            let updated_at = chrono::Utc::now().to_rfc3339();
            self.lock().conn().execute(
                "INSERT INTO record_syncs (chain, address, start_block, end_block, page, range_complete, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                 ON CONFLICT (chain, address, start_block, end_block) DO UPDATE SET \
                     page = excluded.page, \
                     range_complete = excluded.range_complete, \
                     updated_at = excluded.updated_at",
                params![chain, address, start_block, end_block, page, range_complete, updated_at],
            )?;
            Ok(())
        })
    }

    /// The provisional checkpoint for an exact range, if a previous scan of
    /// it was interrupted mid-way
    pub fn provisional_record_sync(
        &self,
        chain: &str,
        address: &str,
        start_block: u32,
        end_block: u32,
    ) -> Result<Option<RecordSync>> {
        let sync = self
            .lock()
            .conn()
            .query_row(
                "SELECT id, chain, address, start_block, end_block, page, range_complete, updated_at \
                 FROM record_syncs \
                 WHERE chain = ?1 AND address = ?2 AND start_block = ?3 AND end_block = ?4 \
                   AND range_complete = 0",
                params![chain, address, start_block, end_block],
                sync_from_row,
            )
            .optional()?;
        Ok(sync)
    }

    /// Compact adjacent completed checkpoints (`end == next start`) into
    /// single rows. Returns the number of merges performed.
    pub fn merge_adjacent_record_syncs(&self, chain: &str, address: &str) -> Result<usize> {
        let mut db = self.lock();
        let tx = db.transaction()?;

        let complete: Vec<(u32, u32)> = {
            let mut stmt = tx.prepare(
                "SELECT start_block, end_block FROM record_syncs \
                 WHERE chain = ?1 AND address = ?2 AND range_complete = 1 \
                 ORDER BY start_block",
            )?;
            let rows = stmt
                .query_map(params![chain, address], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(complete.len());
        for (start, end) in complete.iter().copied() {
            match merged.last_mut() {
                Some(last) if last.1 == start => last.1 = end,
                _ => merged.push((start, end)),
            }
        }

        let merges = complete.len() - merged.len();
        if merges > 0 {
            tx.execute(
                "DELETE FROM record_syncs \
                 WHERE chain = ?1 AND address = ?2 AND range_complete = 1",
                params![chain, address],
            )?;
            let updated_at = chrono::Utc::now().to_rfc3339();
            for (start, end) in &merged {
                tx.execute(
                    "INSERT INTO record_syncs (chain, address, start_block, end_block, page, range_complete, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, 0, 1, ?5)",
                    params![chain, address, start, end, updated_at],
                )?;
            }
            tracing::debug!(chain, address, merges, "compacted sync checkpoints");
        }

        tx.commit()?;
        Ok(merges)
    }

    /// Height the last completed cycle synced one (chain, address) to
    pub fn public_sync_height(&self, chain: &str, address: &str) -> Result<Option<u32>> {
        let height = self
            .lock()
            .conn()
            .query_row(
                "SELECT last_synced_block FROM public_syncs WHERE chain = ?1 AND address = ?2",
                params![chain, address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(height)
    }

    /// Record cycle completion for one (chain, address)
    pub fn upsert_public_sync(&self, chain: &str, address: &str, height: u32) -> Result<()> {
        execute_with_retry(|| {
            let updated_at = chrono::Utc::now().to_rfc3339();
            self.lock().conn().execute(
                "INSERT INTO public_syncs (chain, address, last_synced_block, updated_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT (chain, address) DO UPDATE SET \
                     last_synced_block = excluded.last_synced_block, \
                     updated_at = excluded.updated_at",
                params![chain, address, height, updated_at],
            )?;
            Ok(())
        })
    }

    /// The spent tracker's resumable page checkpoint; `-1` means "start
    /// from the beginning".
    pub fn serial_sync_page(&self, chain: &str) -> Result<i64> {
        let page = self
            .lock()
            .conn()
            .query_row(
                "SELECT page FROM serial_number_sync_times WHERE chain = ?1",
                params![chain],
                |row| row.get(0),
            )
            .optional()?;
        Ok(page.unwrap_or(-1))
    }

    /// Persist the spent tracker's page checkpoint
    pub fn set_serial_sync_page(&self, chain: &str, page: i64) -> Result<()> {
        execute_with_retry(|| {
            let updated_at = chrono::Utc::now().to_rfc3339();
            self.lock().conn().execute(
                "INSERT INTO serial_number_sync_times (chain, page, updated_at) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT (chain) DO UPDATE SET \
                     page = excluded.page, \
                     updated_at = excluded.updated_at",
                params![chain, page, updated_at],
            )?;
            Ok(())
        })
    }

    /// The minimum block height an address could own records from
    pub fn creation_height(&self, chain: &str, address: &str) -> Result<Option<u32>> {
        let height = self
            .lock()
            .conn()
            .query_row(
                "SELECT block_height FROM account_creation_block_heights \
                 WHERE chain = ?1 AND address = ?2",
                params![chain, address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(height)
    }

    /// Write an address's creation height once and return the effective
    /// value. A second write for the same (chain, address) is ignored.
    pub fn init_creation_height(&self, chain: &str, address: &str, height: u32) -> Result<u32> {
        let db = self.lock();
        db.conn().execute(
            "INSERT OR IGNORE INTO account_creation_block_heights (chain, address, block_height) \
             VALUES (?1, ?2, ?3)",
            params![chain, address, height],
        )?;
        let effective = db.conn().query_row(
            "SELECT block_height FROM account_creation_block_heights \
             WHERE chain = ?1 AND address = ?2",
            params![chain, address],
            |row| row.get(0),
        )?;
        Ok(effective)
    }
}

/// Execute with retry logic for SQLITE_BUSY
fn execute_with_retry<T, F>(mut f: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempts = 0;

    loop {
        match f() {
            Ok(result) => return Ok(result),
            Err(Error::Database(ref e)) if is_busy_error(e) && attempts < MAX_BUSY_RETRIES => {
                attempts += 1;
                let backoff = calculate_backoff(attempts);
                tracing::debug!(
                    "SQLITE_BUSY (attempt {}/{}), retrying in {}ms",
                    attempts,
                    MAX_BUSY_RETRIES,
                    backoff
                );
                thread::sleep(Duration::from_millis(backoff));
            }
            Err(e) => return Err(e),
        }
    }
}

/// Check if error is SQLITE_BUSY
fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: ErrorCode::DatabaseBusy,
                ..
            },
            _
        )
    )
}

/// Calculate exponential backoff with jitter
fn calculate_backoff(attempt: u32) -> u64 {
    let base = BASE_BACKOFF_MS * (1 << attempt.min(6));
    let jitter = rand::random::<u64>() % (base / 4 + 1);
    (base + jitter).min(MAX_BACKOFF_MS)
}
