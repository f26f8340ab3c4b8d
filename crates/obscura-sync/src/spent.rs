//! Serial-number spend tracking
//!
//! Spends are not observable from record outputs, so the tracker pages the
//! ledger's unspent serial numbers past the gateway and marks whichever
//! come back spent. The page checkpoint persists after every page so an
//! interrupted pass resumes where it stopped, and it resets to -1 after a
//! full pass: every cycle re-checks the whole unspent set from the start,
//! keeping spend state fresh even when an earlier page was mutated while
//! the pass was running.

use crate::cancel::CancelToken;
use crate::gateway::ChainGateway;
use crate::{Error, Result};
use obscura_storage_sqlite::Ledger;
use std::collections::HashMap;

/// What one tracking pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpentOutcome {
    /// Serial numbers checked against the gateway
    pub checked: usize,
    /// Records newly marked spent
    pub newly_spent: usize,
    /// Pages processed
    pub pages: u32,
}

/// Run one spend-tracking pass over the unspent serial numbers.
pub async fn track_spent(
    ledger: &Ledger,
    gateway: &dyn ChainGateway,
    chain: &str,
    page_size: u32,
    cancel: &CancelToken,
) -> Result<SpentOutcome> {
    // The checkpoint is the last completed page; -1 means start over.
    let mut page = (ledger.serial_sync_page(chain)? + 1).max(0) as u32;
    let mut outcome = SpentOutcome::default();

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let rows = ledger.unspent_serial_numbers(chain, page, page_size)?;
        if rows.is_empty() {
            ledger.set_serial_sync_page(chain, -1)?;
            break;
        }

        let by_serial: HashMap<&str, &str> = rows
            .iter()
            .map(|(id, serial)| (serial.as_str(), id.as_str()))
            .collect();
        let serials: Vec<String> = rows.iter().map(|(_, serial)| serial.clone()).collect();
        let statuses = gateway.get_serial_numbers(chain, &serials).await?;
        outcome.checked += serials.len();

        for status in statuses {
            if !status.spent {
                continue;
            }
            let Some(record_id) = by_serial.get(status.serial_number.as_str()) else {
                continue;
            };
            ledger.mark_record_spent(
                record_id,
                status.block_height,
                status.transaction_id.as_deref(),
                status.transition_id.as_deref(),
                status.block_timestamp,
            )?;
            outcome.newly_spent += 1;
            tracing::debug!(record_id = %record_id, "record spent on chain");
        }

        ledger.set_serial_sync_page(chain, i64::from(page))?;
        outcome.pages += 1;
        page += 1;
    }

    Ok(outcome)
}
