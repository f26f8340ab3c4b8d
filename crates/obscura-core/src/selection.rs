//! Input selection for transaction building
//!
//! Two fixed policies: transfer inputs are covered greedily largest-first
//! (fewest inputs, fewest transitions to prove), while the fee input is the
//! smallest single record that still covers the fee, so small fees never
//! fragment large records.

use crate::{Error, Result};

/// A spendable record as seen by the selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectableRecord {
    /// Record id
    pub id: String,
    /// Decrypted amount in microcredits
    pub microcredits: u64,
    /// Block height the record was created at
    pub block_height: u32,
}

impl SelectableRecord {
    /// Convenience constructor
    pub fn new(id: impl Into<String>, microcredits: u64, block_height: u32) -> Self {
        Self {
            id: id.into(),
            microcredits,
            block_height,
        }
    }
}

/// Input selection result
#[derive(Debug)]
pub struct SelectionResult {
    /// Selected records, in selection order
    pub records: Vec<SelectableRecord>,
    /// Total value of selected records
    pub total: u64,
    /// Change amount returned to the sender
    pub change: u64,
}

/// Record selector over unspent, unlocked records
pub struct InputSelector;

impl InputSelector {
    /// Select records covering `amount`, largest first.
    ///
    /// Fails with [`Error::InsufficientBalance`] when the pool cannot cover
    /// the amount; nothing is considered reserved on failure.
    pub fn select_covering(
        mut available: Vec<SelectableRecord>,
        amount: u64,
    ) -> Result<SelectionResult> {
        let available_total = Self::total_available(&available);
        tracing::debug!(
            amount,
            available = available.len(),
            available_total,
            "selecting transfer inputs"
        );

        available.sort_by(|a, b| b.microcredits.cmp(&a.microcredits));

        let mut selected = Vec::new();
        let mut total = 0u64;
        for record in available {
            if total >= amount {
                break;
            }
            total = total
                .checked_add(record.microcredits)
                .ok_or_else(|| Error::AmountOverflow("input total overflow".to_string()))?;
            selected.push(record);
        }

        if total < amount {
            return Err(Error::InsufficientBalance {
                needed: amount,
                available: available_total,
            });
        }

        let change = total - amount;
        tracing::debug!(
            selected = selected.len(),
            total,
            change,
            "transfer inputs selected"
        );
        Ok(SelectionResult {
            records: selected,
            total,
            change,
        })
    }

    /// Select the smallest single record covering `fee` (ascending scan).
    pub fn select_fee(available: Vec<SelectableRecord>, fee: u64) -> Result<SelectableRecord> {
        let available_total = Self::total_available(&available);
        let mut candidates = available;
        candidates.sort_by(|a, b| a.microcredits.cmp(&b.microcredits));

        match candidates.into_iter().find(|r| r.microcredits >= fee) {
            Some(record) => {
                tracing::debug!(fee, record = %record.id, value = record.microcredits, "fee input selected");
                Ok(record)
            }
            None => Err(Error::InsufficientBalance {
                needed: fee,
                available: available_total,
            }),
        }
    }

    /// Total value of a record pool
    pub fn total_available(available: &[SelectableRecord]) -> u64 {
        available
            .iter()
            .fold(0u64, |acc, r| acc.saturating_add(r.microcredits))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<SelectableRecord> {
        vec![
            SelectableRecord::new("r50", 50, 100),
            SelectableRecord::new("r30", 30, 101),
            SelectableRecord::new("r10", 10, 102),
            SelectableRecord::new("r5", 5, 103),
        ]
    }

    #[test]
    fn test_largest_first_covering() {
        let result = InputSelector::select_covering(pool(), 60).unwrap();
        let ids: Vec<&str> = result.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r50", "r30"]);
        assert_eq!(result.total, 80);
        assert_eq!(result.change, 20);
    }

    #[test]
    fn test_single_record_when_it_covers() {
        let result = InputSelector::select_covering(pool(), 40).unwrap();
        let ids: Vec<&str> = result.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r50"]);
        assert_eq!(result.change, 10);
    }

    #[test]
    fn test_insufficient_balance() {
        let err = InputSelector::select_covering(pool(), 200).unwrap_err();
        match err {
            Error::InsufficientBalance { needed, available } => {
                assert_eq!(needed, 200);
                assert_eq!(available, 95);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_exact_cover_has_no_change() {
        let result = InputSelector::select_covering(pool(), 80).unwrap();
        assert_eq!(result.total, 80);
        assert_eq!(result.change, 0);
    }

    #[test]
    fn test_fee_picks_smallest_covering() {
        let record = InputSelector::select_fee(pool(), 20).unwrap();
        assert_eq!(record.id, "r30");
    }

    #[test]
    fn test_fee_picks_exact_match() {
        let record = InputSelector::select_fee(pool(), 10).unwrap();
        assert_eq!(record.id, "r10");
    }

    #[test]
    fn test_fee_insufficient() {
        let err = InputSelector::select_fee(pool(), 60).unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { needed: 60, .. }));
    }

    #[test]
    fn test_empty_pool() {
        assert!(InputSelector::select_covering(Vec::new(), 1).is_err());
        assert!(InputSelector::select_fee(Vec::new(), 1).is_err());
    }
}
