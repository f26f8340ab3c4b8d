//! Amount units and formatting
//!
//! All ledger amounts are carried as whole microcredits (`u64`). Credits are
//! a display unit only.

use crate::{Error, Result};

/// Number of microcredits in one credit
pub const MICROCREDITS_PER_CREDIT: u64 = 1_000_000;

/// Parse a decimal credit string (e.g. "1.5") into microcredits
pub fn parse_credits(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidAmount("empty amount".to_string()));
    }

    let (whole, fraction) = match trimmed.split_once('.') {
        Some((w, f)) => (w, f),
        None => (trimmed, ""),
    };

    if fraction.len() > 6 {
        return Err(Error::InvalidAmount(format!(
            "more than 6 fractional digits: {trimmed}"
        )));
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| Error::InvalidAmount(format!("not a number: {trimmed}")))?
    };

    // Padded to exactly six digits, so an empty fraction parses as zero.
    let mut padded = fraction.to_string();
    while padded.len() < 6 {
        padded.push('0');
    }
    let fraction: u64 = padded
        .parse()
        .map_err(|_| Error::InvalidAmount(format!("not a number: {trimmed}")))?;

    whole
        .checked_mul(MICROCREDITS_PER_CREDIT)
        .and_then(|w| w.checked_add(fraction))
        .ok_or_else(|| Error::AmountOverflow(trimmed.to_string()))
}

/// Format microcredits as a decimal credit string with trailing zeros trimmed
pub fn format_microcredits(microcredits: u64) -> String {
    let whole = microcredits / MICROCREDITS_PER_CREDIT;
    let fraction = microcredits % MICROCREDITS_PER_CREDIT;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{fraction:06}");
    let fraction = fraction.trim_end_matches('0');
    format!("{whole}.{fraction}")
}
