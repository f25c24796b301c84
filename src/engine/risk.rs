//! Risk gate — drawdown, adaptive daily loss, volatility, and
//! concurrency limits.
//!
//! All checks return a `GateResult` with a human-readable reason for
//! logging and alerting; none of them error. Missing capital data is
//! "not ok", never a panic.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::RiskConfig;
use crate::engine::ledger::PairLedger;
use crate::types::Pair;

/// Realized losses retained per pair for the oracle's loss forecaster.
const LOSS_HISTORY_CAP: usize = 256;

// ---------------------------------------------------------------------------
// Gate result
// ---------------------------------------------------------------------------

/// Outcome of a risk check: pass, or fail with a reason.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub ok: bool,
    pub reason: String,
}

impl GateResult {
    pub fn pass() -> Self {
        Self { ok: true, reason: String::new() }
    }

    pub fn fail(reason: String) -> Self {
        Self { ok: false, reason }
    }
}

// ---------------------------------------------------------------------------
// Risk state
// ---------------------------------------------------------------------------

/// Mutable risk bookkeeping owned by the orchestrator and passed by
/// reference into checks — no ambient globals.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskState {
    pub daily_loss_by_pair: HashMap<Pair, f64>,
    /// Calendar date (`%Y-%m-%d`) of the last daily reset. Date-string
    /// comparison, not elapsed seconds, so a restart crossing midnight
    /// still resets exactly once.
    pub last_reset_date: String,
    loss_history: HashMap<Pair, Vec<f64>>,
}

impl RiskState {
    pub fn new(today: &str) -> Self {
        Self {
            daily_loss_by_pair: HashMap::new(),
            last_reset_date: today.to_string(),
            loss_history: HashMap::new(),
        }
    }

    /// Clear the daily counters when the calendar date has rolled over.
    pub fn maybe_reset(&mut self, today: &str) {
        if today != self.last_reset_date {
            info!(
                from = %self.last_reset_date,
                to = today,
                "Daily loss counters reset"
            );
            self.daily_loss_by_pair.clear();
            self.last_reset_date = today.to_string();
        }
    }

    /// Record a realized loss for the day and the history window.
    pub fn record_loss(&mut self, pair: &Pair, loss: f64) {
        if loss <= 0.0 {
            return;
        }
        *self.daily_loss_by_pair.entry(pair.clone()).or_insert(0.0) += loss;
        let history = self.loss_history.entry(pair.clone()).or_default();
        history.push(loss);
        if history.len() > LOSS_HISTORY_CAP {
            let excess = history.len() - LOSS_HISTORY_CAP;
            history.drain(..excess);
        }
    }

    pub fn daily_loss(&self, pair: &Pair) -> f64 {
        self.daily_loss_by_pair.get(pair).copied().unwrap_or(0.0)
    }

    pub fn recent_losses(&self, pair: &Pair) -> &[f64] {
        self.loss_history.get(pair).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ---------------------------------------------------------------------------
// Risk gate
// ---------------------------------------------------------------------------

/// Stateless check logic, parameterized by config and session capital.
pub struct RiskGate {
    max_drawdown: f64,
    base_daily_loss_limit: f64,
    volatility_threshold: f64,
    min_order_notional: f64,
    max_concurrent_pairs: usize,
    initial_capital: f64,
}

impl RiskGate {
    pub fn new(cfg: &RiskConfig, initial_capital: f64) -> Self {
        Self {
            max_drawdown: cfg.max_drawdown,
            base_daily_loss_limit: cfg.base_daily_loss_limit,
            volatility_threshold: cfg.volatility_threshold,
            min_order_notional: cfg.min_order_notional,
            max_concurrent_pairs: cfg.max_concurrent_pairs,
            initial_capital: initial_capital.max(f64::EPSILON),
        }
    }

    /// Global drawdown check over total mark-to-market value. Fails
    /// closed: a failure here halts trading for the session.
    ///
    /// Pairs without a reference price are marked at their entry price,
    /// or contribute only quote balances when flat.
    pub fn check_drawdown<'a>(
        &self,
        ledgers: impl IntoIterator<Item = &'a PairLedger>,
        prices: &HashMap<Pair, f64>,
    ) -> GateResult {
        let mut total_value = 0.0;
        for ledger in ledgers {
            let reference = prices
                .get(&ledger.pair)
                .copied()
                .or(ledger.entry_price)
                .unwrap_or(0.0);
            total_value += ledger.mark_to_market(reference);
        }

        let drawdown = (self.initial_capital - total_value) / self.initial_capital;
        if drawdown > self.max_drawdown {
            return GateResult::fail(format!(
                "Maximum drawdown exceeded: {:.1}% (> {:.1}%)",
                drawdown * 100.0,
                self.max_drawdown * 100.0,
            ));
        }
        GateResult::pass()
    }

    /// Adaptive daily-loss check for one pair.
    ///
    /// The limit fraction is the larger of the volatility-damped base
    /// limit and 1.5× the forecasted loss relative to the pair's quote
    /// capital. Pairs with no quote capital fail the check outright.
    pub fn check_daily_loss(
        &self,
        state: &mut RiskState,
        pair: &Pair,
        ledger: &PairLedger,
        atr: f64,
        forecasted_loss: f64,
        today: &str,
    ) -> GateResult {
        state.maybe_reset(today);

        let quote = ledger.total_quote();
        if quote <= 0.0 {
            return GateResult::fail(format!("{pair}: no quote capital for daily-loss check"));
        }

        let damping =
            (1.0 - atr / (self.initial_capital * self.volatility_threshold)).clamp(0.0, 1.0);
        let limit_fraction =
            (self.base_daily_loss_limit * damping).max(forecasted_loss / quote * 1.5);
        let limit = quote * limit_fraction;

        let loss = state.daily_loss(pair);
        debug!(
            pair = %pair,
            loss,
            limit,
            damping,
            forecasted_loss,
            "Daily-loss check"
        );
        if loss > limit {
            return GateResult::fail(format!(
                "{pair}: adaptive daily loss limit exceeded: {loss:.2} (> {limit:.2}, forecast {forecasted_loss:.2})"
            ));
        }
        GateResult::pass()
    }

    /// ATR-normalized volatility check.
    pub fn check_volatility(&self, pair: &Pair, atr: f64, avg_price: f64) -> GateResult {
        if avg_price <= 0.0 {
            return GateResult::fail(format!("{pair}: no price data for volatility check"));
        }
        let volatility = atr / avg_price;
        if volatility > self.volatility_threshold {
            return GateResult::fail(format!(
                "{pair}: volatility too high: {:.1}% (> {:.1}%)",
                volatility * 100.0,
                self.volatility_threshold * 100.0,
            ));
        }
        GateResult::pass()
    }

    /// Number of pairs the available capital can responsibly trade at
    /// once: total quote divided by a per-pair floor, capped to bound
    /// blast radius.
    pub fn optimal_concurrency<'a>(
        &self,
        ledgers: impl IntoIterator<Item = &'a PairLedger>,
    ) -> usize {
        let total: f64 = ledgers.into_iter().map(|l| l.total_quote()).sum();
        let floor = self.min_order_notional * 2.0;
        let possible = if floor > 0.0 { (total / floor) as usize } else { 0 };
        possible.clamp(1, self.max_concurrent_pairs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
