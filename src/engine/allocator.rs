//! Capital allocator — harmonic-rank weighting across selected pairs.
//!
//! Pair ranked r (1-indexed) receives weight 1/r, normalized so the
//! weights sum to one. Only uncommitted quote capital moves: open
//! positions' base quantities are never touched, and unselected pairs'
//! quote is zeroed for the cycle so it can fund the selected ones.

use tracing::{debug, info};

use crate::engine::ledger::PairLedger;
use crate::types::Pair;

/// Normalized harmonic weights for `n` ranks: weight(r) = (1/r) / H(n).
pub fn harmonic_weights(n: usize) -> Vec<f64> {
    if n == 0 {
        return Vec::new();
    }
    let total: f64 = (1..=n).map(|r| 1.0 / r as f64).sum();
    (1..=n).map(|r| (1.0 / r as f64) / total).collect()
}

/// Redistribute each venue's total uncommitted quote across the selected
/// pairs in rank order. `selected` must be sorted best-first — the
/// scanner's composite ordering is the ranking.
pub fn reallocate(ledgers: &mut [&mut PairLedger], selected: &[Pair], venues: &[&str]) {
    if selected.is_empty() {
        return;
    }
    let weights = harmonic_weights(selected.len());

    for venue in venues {
        let total: f64 = ledgers.iter().map(|l| l.quote_balance(venue)).sum();

        for ledger in ledgers.iter_mut() {
            let share = selected
                .iter()
                .position(|p| *p == ledger.pair)
                .map(|rank| total * weights[rank])
                .unwrap_or(0.0);
            ledger.quote.insert(venue.to_string(), share);
            debug!(pair = %ledger.pair, venue, share, "Quote reallocated");
        }
    }

    info!(
        selected = selected.len(),
        top = %selected[0],
        "Capital reallocated by harmonic rank"
    );
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
