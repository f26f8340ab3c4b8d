//! Sync planning
//!
//! The planner turns persisted scan checkpoints into the block ranges each
//! address still needs. Only checkpoints with `range_complete` count as
//! coverage; provisional rows are resume hints for the scanner and are
//! ignored here. Ranges are chunked on absolute multiples of the batch
//! size, so re-planning a partially scanned range reproduces identical
//! chunks and the scanner's per-chunk checkpoints stay meaningful across
//! restarts. Identical chunks wanted by several addresses merge into one
//! step, and steps come out most-recent-first so fresh activity surfaces
//! before historical backfill.

use crate::Result;
use obscura_storage_sqlite::{Ledger, RecordSync};
use std::collections::BTreeMap;

/// A contiguous block range one or more addresses still need scanned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStep {
    /// Start block, inclusive
    pub start_block: u32,
    /// End block, exclusive
    pub end_block: u32,
    /// Addresses that still need this range
    pub addresses: Vec<String>,
}

impl SyncStep {
    /// Number of blocks the step covers
    pub fn len(&self) -> u32 {
        self.end_block - self.start_block
    }

    /// Whether the step covers no blocks
    pub fn is_empty(&self) -> bool {
        self.end_block <= self.start_block
    }
}

/// Plan the pending scan steps for a set of addresses up to and including
/// `current_height`.
pub fn plan_steps(
    ledger: &Ledger,
    chain: &str,
    addresses: &[String],
    current_height: u32,
    batch_size: u32,
) -> Result<Vec<SyncStep>> {
    let batch_size = batch_size.max(1);
    let target_end = current_height.saturating_add(1);

    let mut merged: BTreeMap<(u32, u32), Vec<String>> = BTreeMap::new();
    for address in addresses {
        let min_height = ledger.creation_height(chain, address)?.unwrap_or(0);
        let complete = ledger.complete_record_syncs(chain, address)?;
        for (start, end) in pending_ranges(min_height, target_end, &complete) {
            for chunk in chunk_range(start, end, batch_size) {
                merged.entry(chunk).or_default().push(address.clone());
            }
        }
    }

    let mut steps: Vec<SyncStep> = merged
        .into_iter()
        .map(|((start_block, end_block), addresses)| SyncStep {
            start_block,
            end_block,
            addresses,
        })
        .collect();
    steps.sort_by(|a, b| {
        b.start_block
            .cmp(&a.start_block)
            .then(b.end_block.cmp(&a.end_block))
    });
    Ok(steps)
}

/// Uncovered ranges for one address: the gap below the earliest complete
/// checkpoint, gaps between checkpoints, and the tail up to the target.
///
/// `complete` must be sorted by start block, which is how the ledger
/// returns it.
fn pending_ranges(min_height: u32, target_end: u32, complete: &[RecordSync]) -> Vec<(u32, u32)> {
    let mut ranges = Vec::new();
    if complete.is_empty() {
        if min_height < target_end {
            ranges.push((min_height, target_end));
        }
        return ranges;
    }

    let first = &complete[0];
    if first.start_block > min_height {
        ranges.push((min_height, first.start_block));
    }
    for pair in complete.windows(2) {
        if pair[0].end_block < pair[1].start_block {
            ranges.push((pair[0].end_block, pair[1].start_block));
        }
    }
    let last = &complete[complete.len() - 1];
    if last.end_block < target_end {
        ranges.push((last.end_block, target_end));
    }
    ranges
}

/// Split a range on absolute multiples of `batch_size`
fn chunk_range(start: u32, end: u32, batch_size: u32) -> Vec<(u32, u32)> {
    let batch = u64::from(batch_size);
    let end = u64::from(end);
    let mut chunks = Vec::new();
    let mut cursor = u64::from(start);
    while cursor < end {
        let boundary = (cursor / batch + 1) * batch;
        let chunk_end = boundary.min(end);
        chunks.push((cursor as u32, chunk_end as u32));
        cursor = chunk_end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const CHAIN: &str = "obscura-testnet";
    const ALICE: &str = "obsc1alice";
    const BOB: &str = "obsc1bob";

    fn test_ledger() -> Ledger {
        Ledger::open_in_memory().unwrap()
    }

    fn complete_range(ledger: &Ledger, address: &str, start: u32, end: u32) {
        ledger
            .upsert_record_sync(CHAIN, address, start, end, 0, true)
            .unwrap();
    }

    fn plan(ledger: &Ledger, addresses: &[&str], height: u32, batch: u32) -> Vec<SyncStep> {
        let addresses: Vec<String> = addresses.iter().map(|a| a.to_string()).collect();
        plan_steps(ledger, CHAIN, &addresses, height, batch).unwrap()
    }

    #[test]
    fn test_fresh_address_covers_from_zero() {
        let ledger = test_ledger();
        let steps = plan(&ledger, &[ALICE], 2_499, 1_000);

        let ranges: Vec<(u32, u32)> = steps
            .iter()
            .map(|s| (s.start_block, s.end_block))
            .collect();
        assert_eq!(ranges, vec![(2_000, 2_500), (1_000, 2_000), (0, 1_000)]);
        assert!(steps.iter().all(|s| s.addresses == vec![ALICE.to_string()]));
    }

    #[test]
    fn test_creation_height_bounds_the_plan() {
        let ledger = test_ledger();
        ledger.init_creation_height(CHAIN, ALICE, 4_500).unwrap();

        let steps = plan(&ledger, &[ALICE], 5_999, 1_000);
        let ranges: Vec<(u32, u32)> = steps
            .iter()
            .map(|s| (s.start_block, s.end_block))
            .collect();
        assert_eq!(ranges, vec![(5_000, 6_000), (4_500, 5_000)]);
    }

    #[test]
    fn test_gaps_and_tail_are_planned() {
        let ledger = test_ledger();
        complete_range(&ledger, ALICE, 1_000, 2_000);
        complete_range(&ledger, ALICE, 3_000, 4_000);

        let steps = plan(&ledger, &[ALICE], 4_999, 1_000);
        let ranges: Vec<(u32, u32)> = steps
            .iter()
            .map(|s| (s.start_block, s.end_block))
            .collect();
        assert_eq!(
            ranges,
            vec![(4_000, 5_000), (2_000, 3_000), (0, 1_000)]
        );
    }

    #[test]
    fn test_provisional_checkpoints_are_not_coverage() {
        let ledger = test_ledger();
        ledger
            .upsert_record_sync(CHAIN, ALICE, 0, 1_000, 3, false)
            .unwrap();

        let steps = plan(&ledger, &[ALICE], 999, 1_000);
        assert_eq!(steps.len(), 1);
        assert_eq!((steps[0].start_block, steps[0].end_block), (0, 1_000));
    }

    #[test]
    fn test_fully_covered_address_plans_nothing() {
        let ledger = test_ledger();
        complete_range(&ledger, ALICE, 0, 3_000);

        assert!(plan(&ledger, &[ALICE], 2_999, 1_000).is_empty());
    }

    #[test]
    fn test_checkpoint_beyond_tip_adds_no_tail() {
        let ledger = test_ledger();
        complete_range(&ledger, ALICE, 0, 5_000);

        assert!(plan(&ledger, &[ALICE], 3_999, 1_000).is_empty());
    }

    #[test]
    fn test_identical_chunks_merge_across_addresses() {
        let ledger = test_ledger();
        complete_range(&ledger, ALICE, 0, 1_000);

        let steps = plan(&ledger, &[ALICE, BOB], 1_999, 1_000);
        let ranges: Vec<(u32, u32, usize)> = steps
            .iter()
            .map(|s| (s.start_block, s.end_block, s.addresses.len()))
            .collect();
        // Both need [1000, 2000); only Bob still needs [0, 1000).
        assert_eq!(ranges, vec![(1_000, 2_000, 2), (0, 1_000, 1)]);
        assert_eq!(
            steps[0].addresses,
            vec![ALICE.to_string(), BOB.to_string()]
        );
        assert_eq!(steps[1].addresses, vec![BOB.to_string()]);
    }

    #[test]
    fn test_chunks_align_to_absolute_boundaries() {
        let chunks = chunk_range(4_500, 6_200, 1_000);
        assert_eq!(chunks, vec![(4_500, 5_000), (5_000, 6_000), (6_000, 6_200)]);
    }

    #[test]
    fn test_planned_steps_rechunk_to_themselves() {
        let ledger = test_ledger();
        complete_range(&ledger, ALICE, 1_500, 2_000);

        for step in plan(&ledger, &[ALICE], 3_250, 1_000) {
            assert_eq!(
                chunk_range(step.start_block, step.end_block, 1_000),
                vec![(step.start_block, step.end_block)]
            );
        }
    }

    #[test]
    fn test_steps_ordered_most_recent_first() {
        let ledger = test_ledger();
        complete_range(&ledger, ALICE, 2_000, 3_000);

        let steps = plan(&ledger, &[ALICE], 9_999, 1_000);
        for pair in steps.windows(2) {
            assert!(pair[0].start_block > pair[1].start_block);
        }
        assert_eq!(steps[0].start_block, 9_000);
    }

    proptest! {
        /// Complete checkpoints plus planned steps exactly cover
        /// [min_height, height + 1) with no overlap.
        #[test]
        fn prop_plan_covers_exactly(
            segments in prop::collection::vec((1u32..40, 1u32..40), 0..5),
            min_height in 0u32..50,
            extra_height in 0u32..200,
            batch_size in 1u32..64,
        ) {
            let ledger = test_ledger();
            ledger.init_creation_height(CHAIN, ALICE, min_height).unwrap();

            // Build sorted, disjoint complete ranges above min_height.
            let mut cursor = min_height;
            let mut complete = Vec::new();
            for (gap, len) in segments {
                let start = cursor + gap;
                let end = start + len;
                complete_range(&ledger, ALICE, start, end);
                complete.push((start, end));
                cursor = end;
            }
            let height = cursor + extra_height;
            let target_end = height + 1;

            let steps = plan(&ledger, &[ALICE], height, batch_size);

            let mut covered: Vec<(u32, u32)> = steps
                .iter()
                .map(|s| (s.start_block, s.end_block))
                .chain(complete.iter().copied().filter(|(s, _)| *s < target_end))
                .collect();
            covered.sort_unstable();

            let mut expect = min_height;
            for (start, end) in covered {
                prop_assert_eq!(start, expect, "coverage gap or overlap at {}", start);
                prop_assert!(end > start);
                expect = end.min(target_end);
            }
            prop_assert_eq!(expect, target_end);

            // Every planned chunk respects the batch size and boundaries.
            for step in &steps {
                prop_assert!(step.len() <= batch_size);
                prop_assert!(
                    step.end_block % batch_size == 0
                        || step.end_block == target_end
                        || complete.iter().any(|(s, _)| *s == step.end_block)
                );
            }
        }
    }
}
