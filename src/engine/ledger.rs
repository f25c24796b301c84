//! Per-pair ledger — balance and position accounting.
//!
//! Reconciles confirmed fills into balances, tracks the open entry price,
//! and accumulates fees, cost, and revenue. Quote balances can never go
//! negative: debits past zero fail, fill reconciliation clamps and logs
//! the anomaly (the money already moved on the venue; the ledger refuses
//! to invent a negative balance for it).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::errors::TradeError;
use crate::types::{Pair, Side};

// ---------------------------------------------------------------------------
// Fill outcome
// ---------------------------------------------------------------------------

/// What a reconciled fill did to the ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct FillOutcome {
    /// Realized loss versus the entry price (sell fills below entry only).
    /// Fed into the daily-loss risk state by the caller.
    pub realized_loss: f64,
    /// The sell returned the position to flat.
    pub position_closed: bool,
}

// ---------------------------------------------------------------------------
// PairLedger
// ---------------------------------------------------------------------------

/// Balance and position record for one trading pair.
///
/// Created at session start with an initial capital split; mutated only
/// by the order-lifecycle manager on confirmed fills or by the allocator
/// on capital reallocation. One writer per pair per cycle (enforced by
/// the orchestrator's task partitioning), so mutations need no locks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairLedger {
    pub pair: Pair,
    /// Held quantity of the base asset.
    pub base_qty: f64,
    /// Available quote currency per venue.
    pub quote: HashMap<String, f64>,
    /// Price of the most recent open long entry. `Some` iff `base_qty > 0`.
    pub entry_price: Option<f64>,
    pub total_fees: f64,
    pub cumulative_cost: f64,
    pub cumulative_revenue: f64,
}

impl PairLedger {
    /// Fresh ledger with an initial quote split across venues.
    pub fn new(pair: Pair, initial_quote: &[(String, f64)]) -> Self {
        Self {
            pair,
            base_qty: 0.0,
            quote: initial_quote.iter().cloned().collect(),
            entry_price: None,
            total_fees: 0.0,
            cumulative_cost: 0.0,
            cumulative_revenue: 0.0,
        }
    }

    /// Available quote balance on one venue.
    pub fn quote_balance(&self, venue: &str) -> f64 {
        self.quote.get(venue).copied().unwrap_or(0.0)
    }

    /// Sum of quote balances across venues.
    pub fn total_quote(&self) -> f64 {
        self.quote.values().sum()
    }

    /// Add quote currency to a venue's balance.
    pub fn credit(&mut self, venue: &str, amount: f64) {
        if amount <= 0.0 {
            return;
        }
        *self.quote.entry(venue.to_string()).or_insert(0.0) += amount;
    }

    /// Remove quote currency from a venue's balance. Fails when the
    /// balance cannot cover the amount — the balance is left untouched.
    pub fn debit(&mut self, venue: &str, amount: f64) -> Result<(), TradeError> {
        let available = self.quote_balance(venue);
        if amount > available {
            return Err(TradeError::InsufficientBalance { needed: amount, available });
        }
        if let Some(balance) = self.quote.get_mut(venue) {
            *balance -= amount;
        }
        Ok(())
    }

    /// Reconcile a confirmed fill into the ledger.
    ///
    /// Buy: base quantity grows, the venue's quote balance is debited by
    /// cost plus fee. Sell: base shrinks (clamped at zero), the venue's
    /// quote balance is credited with proceeds net of fee.
    ///
    /// `entry_price` is set on the first buy into a flat position and
    /// cleared when the position returns to flat.
    pub fn apply_fill(
        &mut self,
        venue: &str,
        side: Side,
        filled_qty: f64,
        price: f64,
        fee: f64,
    ) -> FillOutcome {
        if filled_qty <= 0.0 {
            return FillOutcome::default();
        }
        let mut outcome = FillOutcome::default();
        let notional = filled_qty * price;

        match side {
            Side::Buy => {
                if self.base_qty == 0.0 {
                    self.entry_price = Some(price);
                }
                self.base_qty += filled_qty;

                let cost = notional + fee;
                let available = self.quote_balance(venue);
                if cost > available {
                    warn!(
                        pair = %self.pair,
                        venue,
                        cost,
                        available,
                        "Reconciliation anomaly: buy cost exceeds ledger balance, clamping at zero"
                    );
                }
                if let Some(balance) = self.quote.get_mut(venue) {
                    *balance = (*balance - cost).max(0.0);
                } // no tracked balance on this venue: nothing to debit
                self.cumulative_cost += cost;
            }
            Side::Sell => {
                if filled_qty > self.base_qty {
                    warn!(
                        pair = %self.pair,
                        filled_qty,
                        base_qty = self.base_qty,
                        "Reconciliation anomaly: sell fill exceeds held quantity, clamping at zero"
                    );
                }
                self.base_qty = (self.base_qty - filled_qty).max(0.0);

                let proceeds = (notional - fee).max(0.0);
                self.credit(venue, proceeds);
                self.cumulative_revenue += proceeds;

                if let Some(entry) = self.entry_price {
                    if price < entry {
                        outcome.realized_loss = (entry - price) * filled_qty;
                    }
                }
                if self.base_qty == 0.0 {
                    self.entry_price = None;
                    outcome.position_closed = true;
                }
            }
        }

        self.total_fees += fee;

        debug!(
            pair = %self.pair,
            venue,
            side = %side,
            filled_qty,
            price,
            fee,
            base_qty = self.base_qty,
            quote = self.quote_balance(venue),
            "Fill reconciled"
        );

        outcome
    }

    /// Mark-to-market value: held base at the reference price plus all
    /// quote balances.
    pub fn mark_to_market(&self, reference_price: f64) -> f64 {
        self.base_qty * reference_price + self.total_quote()
    }

    /// Zero the ledger at shutdown liquidation. Accumulators survive for
    /// the final report.
    pub fn zero(&mut self) {
        self.base_qty = 0.0;
        self.entry_price = None;
        for balance in self.quote.values_mut() {
            *balance = 0.0;
        }
    }

    /// The `entry_price.is_some() == base_qty > 0` invariant, checked by
    /// tests after every mutation.
    pub fn invariant_holds(&self) -> bool {
        (self.entry_price.is_some() == (self.base_qty > 0.0))
            && self.base_qty >= 0.0
            && self.quote.values().all(|b| *b >= 0.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn make_ledger(binance: f64, bingx: f64) -> PairLedger {
        PairLedger::new(
            Pair::new("ETH", "USDT"),
            &[("binance".to_string(), binance), ("bingx".to_string(), bingx)],
        )
    }

    #[test]
    fn test_new_ledger_is_flat() {
        let ledger = make_ledger(128.0, 100.0);
        assert_eq!(ledger.base_qty, 0.0);
        assert!(ledger.entry_price.is_none());
        assert_eq!(ledger.total_quote(), 228.0);
        assert!(ledger.invariant_holds());
    }

    #[test]
    fn test_credit_and_debit() {
        let mut ledger = make_ledger(100.0, 0.0);
        ledger.credit("binance", 50.0);
        assert_eq!(ledger.quote_balance("binance"), 150.0);

        ledger.debit("binance", 30.0).unwrap();
        assert_eq!(ledger.quote_balance("binance"), 120.0);
        assert!(ledger.invariant_holds());
    }

    #[test]
    fn test_debit_past_zero_fails_and_leaves_balance() {
        let mut ledger = make_ledger(10.0, 0.0);
        let err = ledger.debit("binance", 10.5).unwrap_err();
        assert!(matches!(err, TradeError::InsufficientBalance { .. }));
        assert_eq!(ledger.quote_balance("binance"), 10.0);
    }

    #[test]
    fn test_debit_unknown_venue_fails() {
        let mut ledger = make_ledger(10.0, 0.0);
        assert!(ledger.debit("okx", 1.0).is_err());
    }

    #[test]
    fn test_buy_fill_sets_entry_and_debits() {
        let mut ledger = make_ledger(1000.0, 0.0);
        let outcome = ledger.apply_fill("binance", Side::Buy, 0.4, 2000.0, 0.8);

        assert_eq!(ledger.base_qty, 0.4);
        assert_eq!(ledger.entry_price, Some(2000.0));
        assert!((ledger.quote_balance("binance") - 199.2).abs() < 1e-9); // 1000 - 800 - 0.8
        assert!((ledger.total_fees - 0.8).abs() < 1e-12);
        assert!((ledger.cumulative_cost - 800.8).abs() < 1e-9);
        assert_eq!(outcome.realized_loss, 0.0);
        assert!(ledger.invariant_holds());
    }

    #[test]
    fn test_second_buy_keeps_first_entry() {
        let mut ledger = make_ledger(2000.0, 0.0);
        ledger.apply_fill("binance", Side::Buy, 0.2, 2000.0, 0.0);
        ledger.apply_fill("binance", Side::Buy, 0.2, 2100.0, 0.0);
        assert_eq!(ledger.entry_price, Some(2000.0));
        assert!(ledger.invariant_holds());
    }

    #[test]
    fn test_sell_fill_credits_net_of_fee_and_clears_entry() {
        let mut ledger = make_ledger(1000.0, 0.0);
        ledger.apply_fill("binance", Side::Buy, 0.4, 2000.0, 0.0);

        let outcome = ledger.apply_fill("binance", Side::Sell, 0.4, 2100.0, 1.0);
        assert_eq!(ledger.base_qty, 0.0);
        assert!(ledger.entry_price.is_none());
        assert!(outcome.position_closed);
        assert_eq!(outcome.realized_loss, 0.0); // sold above entry
        // 1000 - 800 + (0.4 * 2100 - 1)
        assert!((ledger.quote_balance("binance") - 1039.0).abs() < 1e-9);
        assert!((ledger.cumulative_revenue - 839.0).abs() < 1e-9);
        assert!(ledger.invariant_holds());
    }

    #[test]
    fn test_sell_below_entry_reports_loss() {
        let mut ledger = make_ledger(1000.0, 0.0);
        ledger.apply_fill("binance", Side::Buy, 0.5, 2000.0, 0.0);

        let outcome = ledger.apply_fill("binance", Side::Sell, 0.5, 1900.0, 0.0);
        assert!((outcome.realized_loss - 50.0).abs() < 1e-9); // (2000-1900)*0.5
        assert!(outcome.position_closed);
    }

    #[test]
    fn test_partial_sell_keeps_entry() {
        let mut ledger = make_ledger(1000.0, 0.0);
        ledger.apply_fill("binance", Side::Buy, 0.4, 2000.0, 0.0);
        let outcome = ledger.apply_fill("binance", Side::Sell, 0.1, 2050.0, 0.0);

        assert!((ledger.base_qty - 0.3).abs() < 1e-12);
        assert_eq!(ledger.entry_price, Some(2000.0));
        assert!(!outcome.position_closed);
        assert!(ledger.invariant_holds());
    }

    #[test]
    fn test_oversell_clamps_base_at_zero() {
        let mut ledger = make_ledger(1000.0, 0.0);
        ledger.apply_fill("binance", Side::Buy, 0.1, 2000.0, 0.0);

        // Venue reports a bigger fill than we think we hold.
        ledger.apply_fill("binance", Side::Sell, 0.2, 2000.0, 0.0);
        assert_eq!(ledger.base_qty, 0.0);
        assert!(ledger.entry_price.is_none());
        assert!(ledger.invariant_holds());
    }

    #[test]
    fn test_buy_cost_over_balance_clamps_at_zero() {
        let mut ledger = make_ledger(100.0, 0.0);
        // Confirmed fill costs more than the ledger tracks.
        ledger.apply_fill("binance", Side::Buy, 0.1, 2000.0, 0.0);
        assert_eq!(ledger.quote_balance("binance"), 0.0);
        assert_eq!(ledger.base_qty, 0.1);
        assert!(ledger.invariant_holds());
    }

    #[test]
    fn test_fee_eating_proceeds_never_debits() {
        let mut ledger = make_ledger(100.0, 0.0);
        ledger.apply_fill("binance", Side::Buy, 0.001, 2000.0, 0.0);
        // Fee larger than proceeds: credit is clamped at zero, not negative.
        ledger.apply_fill("binance", Side::Sell, 0.001, 2000.0, 5.0);
        assert!(ledger.quote.values().all(|b| *b >= 0.0));
        assert!(ledger.invariant_holds());
    }

    #[test]
    fn test_accumulators_are_monotone() {
        let mut ledger = make_ledger(10_000.0, 0.0);
        let mut prev = (0.0, 0.0, 0.0);
        let fills = [
            (Side::Buy, 0.5, 2000.0, 1.0),
            (Side::Sell, 0.2, 1990.0, 0.5),
            (Side::Buy, 0.1, 2010.0, 0.3),
            (Side::Sell, 0.4, 2020.0, 0.4),
        ];
        for (side, qty, price, fee) in fills {
            ledger.apply_fill("binance", side, qty, price, fee);
            let cur = (ledger.total_fees, ledger.cumulative_cost, ledger.cumulative_revenue);
            assert!(cur.0 >= prev.0 && cur.1 >= prev.1 && cur.2 >= prev.2);
            assert!(ledger.invariant_holds());
            prev = cur;
        }
    }

    #[test]
    fn test_mark_to_market() {
        let mut ledger = make_ledger(500.0, 300.0);
        ledger.apply_fill("binance", Side::Buy, 0.2, 2000.0, 0.0);
        // base 0.2 @ 2100 + (500-400) + 300
        assert!((ledger.mark_to_market(2100.0) - 820.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_resets_balances_keeps_accumulators() {
        let mut ledger = make_ledger(500.0, 300.0);
        ledger.apply_fill("binance", Side::Buy, 0.2, 2000.0, 1.5);
        ledger.zero();

        assert_eq!(ledger.base_qty, 0.0);
        assert!(ledger.entry_price.is_none());
        assert_eq!(ledger.total_quote(), 0.0);
        assert!((ledger.total_fees - 1.5).abs() < 1e-12);
        assert!(ledger.invariant_holds());
    }

    #[test]
    fn test_snapshot_round_trip() {
        let mut ledger = make_ledger(128.0, 100.0);
        ledger.apply_fill("binance", Side::Buy, 0.3, 400.0, 0.2);

        let json = serde_json::to_string(&ledger).unwrap();
        let back: PairLedger = serde_json::from_str(&json).unwrap();
        assert_eq!(back.pair, ledger.pair);
        assert_eq!(back.base_qty, ledger.base_qty);
        assert_eq!(back.entry_price, ledger.entry_price);
        assert_eq!(back.total_quote(), ledger.total_quote());
    }
}
