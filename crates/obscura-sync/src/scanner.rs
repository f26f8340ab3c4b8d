//! Ownership scanning
//!
//! A scan step pages candidate tuples for one block range and runs the
//! constant-time ownership check against every scan key in the step. After
//! each page the step writes a provisional checkpoint per address, so an
//! interrupted scan resumes at the next unprocessed page instead of
//! refetching the whole range. The first empty page proves the range is
//! exhausted; the checkpoint flips to complete and adjacent complete ranges
//! compact into one row.
//!
//! Candidate pages are CPU-bound work. Large pages are partitioned into one
//! disjoint slice per worker and checked on `spawn_blocking` threads; small
//! pages are checked inline because the partition overhead would dominate.

use crate::cancel::CancelToken;
use crate::gateway::ChainGateway;
use crate::planner::SyncStep;
use crate::{Error, Result};
use obscura_core::{OwnershipCandidate, ScanKey};
use obscura_storage_sqlite::{Ledger, OwnedRecord};
use std::sync::Arc;

/// Below this many candidates per worker the check runs inline
const MIN_CANDIDATES_PER_WORKER: usize = 10;

/// What one scan step did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Newly recorded ownership assertions
    pub records_found: usize,
    /// Candidate pages processed
    pub pages: u32,
}

/// Scan one planned step to exhaustion.
///
/// `keys` may hold scan keys for any number of addresses; only those named
/// by the step participate. Ownership assertions are persisted as unsynced
/// [`OwnedRecord`] rows for the completion pass to hydrate.
pub async fn scan_step(
    ledger: &Ledger,
    gateway: &dyn ChainGateway,
    chain: &str,
    step: &SyncStep,
    keys: &[ScanKey],
    cancel: &CancelToken,
) -> Result<ScanOutcome> {
    let mut scan_keys: Vec<(String, ScanKey)> = Vec::new();
    for key in keys {
        let address = key.address().encode()?;
        if step.addresses.iter().any(|a| a == &address) {
            scan_keys.push((address, key.clone()));
        }
    }
    if scan_keys.is_empty() {
        tracing::warn!(
            start = step.start_block,
            end = step.end_block,
            "no scan keys for step addresses, skipping"
        );
        return Ok(ScanOutcome::default());
    }

    // Resume at the earliest unprocessed page across the step's addresses.
    let mut page = u32::MAX;
    for (address, _) in &scan_keys {
        let resume = match ledger.provisional_record_sync(
            chain,
            address,
            step.start_block,
            step.end_block,
        )? {
            Some(sync) => sync.page + 1,
            None => 0,
        };
        page = page.min(resume);
    }

    let workers = num_cpus::get().max(1);
    let mut outcome = ScanOutcome::default();

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let candidates = gateway
            .get_ownership_candidates(chain, step.start_block, step.end_block, page)
            .await?;
        if candidates.is_empty() {
            break;
        }
        outcome.pages += 1;

        let owned = check_candidates(chain, &scan_keys, candidates, workers).await?;
        if !owned.is_empty() {
            outcome.records_found += ledger.insert_owned_records(&owned)?;
        }
        for (address, _) in &scan_keys {
            ledger.upsert_record_sync(
                chain,
                address,
                step.start_block,
                step.end_block,
                page,
                false,
            )?;
        }
        page += 1;
    }

    for (address, _) in &scan_keys {
        ledger.upsert_record_sync(chain, address, step.start_block, step.end_block, page, true)?;
        ledger.merge_adjacent_record_syncs(chain, address)?;
    }

    tracing::debug!(
        start = step.start_block,
        end = step.end_block,
        pages = outcome.pages,
        found = outcome.records_found,
        "scan step complete"
    );
    Ok(outcome)
}

/// Check one candidate page, partitioned across blocking workers when the
/// page is large enough to be worth it.
async fn check_candidates(
    chain: &str,
    scan_keys: &[(String, ScanKey)],
    candidates: Vec<OwnershipCandidate>,
    workers: usize,
) -> Result<Vec<OwnedRecord>> {
    if workers <= 1 || candidates.len() < MIN_CANDIDATES_PER_WORKER * workers {
        return Ok(check_slice(chain, scan_keys, &candidates));
    }

    let chunk_size = candidates.len().div_ceil(workers);
    let shared: Arc<Vec<(String, ScanKey)>> = Arc::new(scan_keys.to_vec());
    let mut handles = Vec::with_capacity(workers);
    for chunk in candidates.chunks(chunk_size) {
        let chunk = chunk.to_vec();
        let keys = Arc::clone(&shared);
        let chain = chain.to_string();
        handles.push(tokio::task::spawn_blocking(move || {
            check_slice(&chain, &keys, &chunk)
        }));
    }

    let mut owned = Vec::new();
    for handle in handles {
        let slice = handle
            .await
            .map_err(|e| Error::Sync(format!("ownership worker failed: {e}")))?;
        owned.extend(slice);
    }
    Ok(owned)
}

fn check_slice(
    chain: &str,
    scan_keys: &[(String, ScanKey)],
    candidates: &[OwnershipCandidate],
) -> Vec<OwnedRecord> {
    let mut owned = Vec::new();
    for candidate in candidates {
        let point = match candidate.decode() {
            Ok(point) => point,
            Err(err) => {
                tracing::debug!(
                    transition_id = %candidate.transition_id,
                    output_index = candidate.output_index,
                    "skipping malformed candidate: {err}"
                );
                continue;
            }
        };
        for (address, key) in scan_keys {
            if key.is_owner(&point) {
                owned.push(OwnedRecord::new(
                    chain,
                    address.clone(),
                    candidate.transition_id.clone(),
                    candidate.output_index,
                ));
                // A record has exactly one owner.
                break;
            }
        }
    }
    owned
}
