//! Per-pair order lifecycle: reconciliation, placement, stop-loss, and
//! residual liquidation.
//!
//! One `trade_cycle` call is one pair's slice of a trading cycle. Within
//! it, operations are strictly sequential: reconcile stale orders, quote
//! the books, place the cycle's orders, done. The orchestrator guarantees
//! at most one task per pair per cycle, so the pair's state moves in and
//! out of this module by value without locks.

use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{RiskConfig, StrategyConfig};
use crate::engine::ledger::PairLedger;
use crate::engine::pricing::{self, PricingContext, Quote};
use crate::engine::scanner::PairAssessment;
use crate::errors::TradeError;
use crate::notify::Notifier;
use crate::types::{
    order_timeout_secs, FeeTable, OpenOrder, OrderStatus, Pair, Side, Ticker,
};
use crate::venues::SpotVenue;

// ---------------------------------------------------------------------------
// Pair state
// ---------------------------------------------------------------------------

/// The unit of per-pair mutable state the orchestrator partitions 1:1 to
/// tasks: the ledger plus the queue of orders still in flight.
#[derive(Debug, Clone)]
pub struct PairState {
    pub ledger: PairLedger,
    pub open_orders: Vec<OpenOrder>,
}

impl PairState {
    pub fn new(ledger: PairLedger) -> Self {
        Self { ledger, open_orders: Vec::new() }
    }
}

/// What a pair's task hands back to the orchestrator.
#[derive(Debug)]
pub struct TradeOutcome {
    pub state: PairState,
    /// Realized losses from sell fills below entry, for the daily-loss
    /// risk state.
    pub realized_losses: Vec<f64>,
    pub fills: usize,
    pub cancellations: usize,
}

// ---------------------------------------------------------------------------
// Stop-loss rule
// ---------------------------------------------------------------------------

/// Which stop-loss rule fired, reported in the exit notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Fixed,
    Atr,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Fixed => write!(f, "Fixed"),
            StopReason::Atr => write!(f, "ATR"),
        }
    }
}

/// Evaluate the stop-loss rules for a long position.
///
/// Fires when the ask drops below `entry − 2×ATR` or below
/// `entry × (1 − fixed_fraction)`, whichever is breached; the ATR rule
/// wins the label when both are.
pub fn stop_loss_trigger(
    entry_price: f64,
    ask: f64,
    atr: f64,
    fixed_fraction: f64,
) -> Option<StopReason> {
    let atr_stop = entry_price - 2.0 * atr;
    let fixed_stop = entry_price * (1.0 - fixed_fraction);
    if ask < atr_stop {
        Some(StopReason::Atr)
    } else if ask < fixed_stop {
        Some(StopReason::Fixed)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Trader
// ---------------------------------------------------------------------------

/// Config slice the trader needs, flattened out of the strategy and risk
/// sections.
#[derive(Debug, Clone)]
pub struct TraderConfig {
    pub prediction_threshold: f64,
    pub exit_threshold: f64,
    pub trade_fraction: f64,
    pub spread_safety_margin: f64,
    pub depth_levels: usize,
    pub base_price_adjustment: f64,
    pub base_max_position_size: f64,
    pub volatility_threshold: f64,
    pub base_daily_loss_limit: f64,
    pub min_order_notional: f64,
    pub min_sell_notional: f64,
    pub fixed_stop_loss: f64,
}

impl TraderConfig {
    pub fn from_config(strategy: &StrategyConfig, risk: &RiskConfig) -> Self {
        Self {
            prediction_threshold: strategy.prediction_threshold,
            exit_threshold: strategy.exit_threshold,
            trade_fraction: strategy.trade_fraction,
            spread_safety_margin: strategy.spread_safety_margin,
            depth_levels: strategy.depth_levels,
            base_price_adjustment: strategy.base_price_adjustment,
            base_max_position_size: strategy.base_max_position_size,
            volatility_threshold: risk.volatility_threshold,
            base_daily_loss_limit: risk.base_daily_loss_limit,
            min_order_notional: risk.min_order_notional,
            min_sell_notional: risk.min_sell_notional,
            fixed_stop_loss: risk.fixed_stop_loss,
        }
    }
}

pub struct PairTrader {
    venue_a: Arc<dyn SpotVenue>,
    venue_b: Arc<dyn SpotVenue>,
    fees: FeeTable,
    cfg: TraderConfig,
    notifier: Notifier,
}

impl PairTrader {
    pub fn new(
        venue_a: Arc<dyn SpotVenue>,
        venue_b: Arc<dyn SpotVenue>,
        fees: FeeTable,
        cfg: TraderConfig,
        notifier: Notifier,
    ) -> Self {
        Self { venue_a, venue_b, fees, cfg, notifier }
    }

    fn venue(&self, name: &str) -> Option<&Arc<dyn SpotVenue>> {
        if self.venue_a.name() == name {
            Some(&self.venue_a)
        } else if self.venue_b.name() == name {
            Some(&self.venue_b)
        } else {
            None
        }
    }

    // -- Reconciliation ----------------------------------------------------

    /// Poll every open order once: reconcile fills into the ledger,
    /// cancel orders older than the ATR-scaled timeout, drop terminal
    /// orders from the queue. Transient poll failures keep the order for
    /// the next cycle.
    pub async fn reconcile_open_orders(
        &self,
        pair: &Pair,
        state: &mut PairState,
        atr: f64,
        losses: &mut Vec<f64>,
    ) -> (usize, usize) {
        let timeout = order_timeout_secs(atr);
        let now = Utc::now();
        let mut fills = 0usize;
        let mut cancellations = 0usize;
        let mut retained = Vec::with_capacity(state.open_orders.len());

        for order in state.open_orders.drain(..) {
            let Some(venue) = self.venue(&order.venue) else {
                warn!(pair = %pair, order_id = %order.id, venue = %order.venue, "Order on unknown venue, dropping");
                continue;
            };

            let snapshot = match venue.fetch_order(&order.id, pair).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(pair = %pair, order_id = %order.id, error = %e, "Order poll failed, retrying next cycle");
                    retained.push(order);
                    continue;
                }
            };

            match snapshot.status {
                OrderStatus::Closed => {
                    let outcome = state.ledger.apply_fill(
                        &order.venue,
                        snapshot.side,
                        snapshot.filled,
                        snapshot.price,
                        snapshot.fee,
                    );
                    if outcome.realized_loss > 0.0 {
                        losses.push(outcome.realized_loss);
                    }
                    fills += 1;
                    self.notifier.send(format!(
                        "{pair}: order {} filled, {} {:.4} @ {:.2}, fee ${:.2}",
                        order.id, snapshot.side, snapshot.filled, snapshot.price, snapshot.fee,
                    ));
                }
                OrderStatus::Canceled => {
                    debug!(pair = %pair, order_id = %order.id, "Order cancelled venue-side, dropping");
                }
                OrderStatus::Open => {
                    if order.age_secs(now) > timeout {
                        match venue.cancel_order(&order.id, pair).await {
                            Ok(()) => {
                                cancellations += 1;
                                self.notifier.send(format!(
                                    "{pair}: order {} cancelled (unfilled after {:.1} min, ATR {:.2})",
                                    order.id,
                                    timeout / 60.0,
                                    atr,
                                ));
                            }
                            Err(e) => {
                                warn!(pair = %pair, order_id = %order.id, error = %e, "Cancel failed, retrying next cycle");
                                retained.push(order);
                            }
                        }
                    } else {
                        retained.push(order);
                    }
                }
            }
        }

        state.open_orders = retained;
        (fills, cancellations)
    }

    // -- Trading cycle -------------------------------------------------------

    /// Run one pair's slice of the cycle. Every failure inside is
    /// contained: the state always comes back, at worst unchanged.
    pub async fn trade_cycle(
        &self,
        assessment: &PairAssessment,
        forecasted_loss: f64,
        mut state: PairState,
    ) -> TradeOutcome {
        let pair = assessment.score.pair.clone();
        let mut losses = Vec::new();

        let (fills, cancellations) = self
            .reconcile_open_orders(&pair, &mut state, assessment.atr, &mut losses)
            .await;

        if let Err(e) = self
            .run_trade_logic(&pair, assessment, forecasted_loss, &mut state)
            .await
        {
            if e.is_transient() {
                warn!(pair = %pair, error = %e, "Trade step failed, pair retried next cycle");
            } else {
                warn!(pair = %pair, error = %e, "Trade step failed, pair skipped");
            }
        }

        TradeOutcome { state, realized_losses: losses, fills, cancellations }
    }

    async fn run_trade_logic(
        &self,
        pair: &Pair,
        assessment: &PairAssessment,
        forecasted_loss: f64,
        state: &mut PairState,
    ) -> Result<(), TradeError> {
        let ticker_a = self.venue_a.fetch_ticker(pair).await?;
        let ticker_b = self.venue_b.fetch_ticker(pair).await?;
        let book_a = self
            .venue_a
            .fetch_order_book(pair, self.cfg.depth_levels)
            .await?;
        let book_b = self
            .venue_b
            .fetch_order_book(pair, self.cfg.depth_levels)
            .await?;

        let name_a = self.venue_a.name().to_string();
        let name_b = self.venue_b.name().to_string();

        let ctx = |venue: &str, ticker: Ticker| PricingContext {
            avg_close: assessment.avg_close,
            atr: assessment.atr,
            forecasted_loss,
            quote_balance: state.ledger.quote_balance(venue),
            base_qty: state.ledger.base_qty,
            ticker,
            volatility_threshold: self.cfg.volatility_threshold,
            base_price_adjustment: self.cfg.base_price_adjustment,
            base_max_position_size: self.cfg.base_max_position_size,
            base_daily_loss_limit: self.cfg.base_daily_loss_limit,
            depth_levels: self.cfg.depth_levels,
        };

        // Probe sizes: buys from what a trade-fraction commitment would
        // purchase at the mid, sells from the held position.
        let mid_a = (ticker_a.bid + ticker_a.ask) / 2.0;
        let buy_probe = if mid_a > 0.0 {
            state.ledger.quote_balance(&name_a) * self.cfg.trade_fraction / mid_a
        } else {
            0.0
        };
        let sell_probe = if state.ledger.base_qty > 0.0 {
            state.ledger.base_qty
        } else {
            buy_probe
        };

        let buy_a =
            pricing::best_price_and_amount(&book_a, Side::Buy, buy_probe, &ctx(&name_a, ticker_a))?;
        let sell_a =
            pricing::best_price_and_amount(&book_a, Side::Sell, sell_probe, &ctx(&name_a, ticker_a))?;
        let buy_b =
            pricing::best_price_and_amount(&book_b, Side::Buy, buy_probe, &ctx(&name_b, ticker_b))?;
        let sell_b =
            pricing::best_price_and_amount(&book_b, Side::Sell, sell_probe, &ctx(&name_b, ticker_b))?;

        // 1. Two-leg cross-venue placement when the live spread clears fees.
        self.try_arbitrage(
            pair, state, ticker_a, ticker_b, &buy_a, &sell_a, &buy_b, &sell_b,
        )
        .await;

        let probability = assessment.score.probability;

        // 2. Signal entry / exit / stop-loss on the primary venue.
        if probability > self.cfg.prediction_threshold {
            self.try_entry(pair, state, &buy_a, probability).await;
        } else if state.ledger.base_qty > 0.0 {
            if probability < self.cfg.exit_threshold {
                self.try_signal_exit(pair, state, &sell_a, probability).await;
            } else if let Some(entry) = state.ledger.entry_price {
                if let Some(reason) =
                    stop_loss_trigger(entry, ticker_a.ask, assessment.atr, self.cfg.fixed_stop_loss)
                {
                    self.try_stop_loss(pair, state, &sell_a, entry, assessment.atr, reason)
                        .await;
                }
            }
        }

        debug!(
            pair = %pair,
            base_qty = state.ledger.base_qty,
            quote_a = state.ledger.quote_balance(&name_a),
            quote_b = state.ledger.quote_balance(&name_b),
            total_fees = state.ledger.total_fees,
            "Pair cycle summary"
        );
        Ok(())
    }

    /// Place the buy and sell legs across venues when the cross spread
    /// exceeds both fees and margin. Best-effort: each leg that fails is
    /// logged and skipped, the other still stands.
    #[allow(clippy::too_many_arguments)]
    async fn try_arbitrage(
        &self,
        pair: &Pair,
        state: &mut PairState,
        ticker_a: Ticker,
        ticker_b: Ticker,
        buy_a: &Quote,
        sell_a: &Quote,
        buy_b: &Quote,
        sell_b: &Quote,
    ) {
        let name_a = self.venue_a.name().to_string();
        let name_b = self.venue_b.name().to_string();
        let min_spread = self.fees.maker(&name_a, pair)
            + self.fees.maker(&name_b, pair)
            + self.cfg.spread_safety_margin;

        let quote_a = state.ledger.quote_balance(&name_a);
        let quote_b = state.ledger.quote_balance(&name_b);
        if quote_a <= self.cfg.min_order_notional || quote_b <= self.cfg.min_order_notional {
            return;
        }

        // Direction 1: buy on A, sell into B's higher ask.
        if ticker_a.bid < ticker_b.ask {
            let spread = (ticker_b.ask - ticker_a.bid) / ticker_a.bid.min(ticker_b.ask);
            if spread > min_spread {
                let amount = (quote_a / buy_a.price)
                    .min(quote_b / sell_b.price)
                    .min(buy_a.amount)
                    .min(sell_b.amount);
                self.place_arb_legs(pair, state, &name_a, buy_a.price, &name_b, sell_b.price, amount)
                    .await;
                return;
            }
        }
        // Direction 2: buy on B, sell into A's higher ask.
        if ticker_b.bid < ticker_a.ask {
            let spread = (ticker_a.ask - ticker_b.bid) / ticker_b.bid.min(ticker_a.ask);
            if spread > min_spread {
                let amount = (quote_b / buy_b.price)
                    .min(quote_a / sell_a.price)
                    .min(buy_b.amount)
                    .min(sell_a.amount);
                self.place_arb_legs(pair, state, &name_b, buy_b.price, &name_a, sell_a.price, amount)
                    .await;
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn place_arb_legs(
        &self,
        pair: &Pair,
        state: &mut PairState,
        buy_venue: &str,
        buy_price: f64,
        sell_venue: &str,
        sell_price: f64,
        amount: f64,
    ) {
        if amount * buy_price < self.cfg.min_order_notional {
            debug!(pair = %pair, amount, "Arbitrage size below minimum notional, skipping");
            return;
        }

        let Some(buyer) = self.venue(buy_venue) else { return };
        let Some(seller) = self.venue(sell_venue) else { return };

        match buyer.place_limit_order(pair, Side::Buy, amount, buy_price).await {
            Ok(handle) => state.open_orders.push(OpenOrder {
                id: handle.id,
                venue: buy_venue.to_string(),
                side: Side::Buy,
                submitted_at: Utc::now(),
                requested_amount: amount,
            }),
            Err(e) => {
                warn!(pair = %pair, venue = buy_venue, error = %e, "Arbitrage buy leg failed");
                return; // no buy leg, don't fire the sell leg either
            }
        }

        match seller.place_limit_order(pair, Side::Sell, amount, sell_price).await {
            Ok(handle) => state.open_orders.push(OpenOrder {
                id: handle.id,
                venue: sell_venue.to_string(),
                side: Side::Sell,
                submitted_at: Utc::now(),
                requested_amount: amount,
            }),
            Err(e) => {
                warn!(pair = %pair, venue = sell_venue, error = %e, "Arbitrage sell leg failed, buy leg left to reconcile");
            }
        }

        let msg = format!(
            "Arbitrage {pair}: buy {amount:.4} on {buy_venue} @ {buy_price:.2}, sell on {sell_venue} @ {sell_price:.2}"
        );
        info!("{msg}");
        self.notifier.send(msg);
    }

    /// Signal entry: limit buy on the primary venue. Required capital
    /// must not exceed the available quote — violation is a warning
    /// no-op, never a partial order.
    async fn try_entry(&self, pair: &Pair, state: &mut PairState, quote: &Quote, probability: f64) {
        let name_a = self.venue_a.name().to_string();
        let available = state.ledger.quote_balance(&name_a);
        if available <= self.cfg.min_order_notional {
            return;
        }

        let amount = quote.amount;
        let required = amount * quote.price;
        if required < self.cfg.min_order_notional {
            debug!(pair = %pair, required, "Entry below minimum notional, skipping");
            return;
        }
        if required > available {
            warn!(
                pair = %pair,
                required,
                available,
                "Entry requires more capital than available, skipping"
            );
            return;
        }

        match self
            .venue_a
            .place_limit_order(pair, Side::Buy, amount, quote.price)
            .await
        {
            Ok(handle) => {
                state.open_orders.push(OpenOrder {
                    id: handle.id,
                    venue: name_a.clone(),
                    side: Side::Buy,
                    submitted_at: Utc::now(),
                    requested_amount: amount,
                });
                let msg = format!(
                    "{pair}: buy {amount:.4} {} on {name_a} @ {:.2}, confidence {probability:.2}",
                    pair.base, quote.price,
                );
                info!("{msg}");
                self.notifier.send(msg);
            }
            Err(e) => warn!(pair = %pair, error = %e, "Entry order failed"),
        }
    }

    /// Confident-down exit: sell part of the position on the primary venue.
    async fn try_signal_exit(
        &self,
        pair: &Pair,
        state: &mut PairState,
        quote: &Quote,
        probability: f64,
    ) {
        let amount = (state.ledger.base_qty * self.cfg.trade_fraction).min(quote.amount);
        if amount <= 0.0 {
            return;
        }

        match self
            .venue_a
            .place_limit_order(pair, Side::Sell, amount, quote.price)
            .await
        {
            Ok(handle) => {
                state.open_orders.push(OpenOrder {
                    id: handle.id,
                    venue: self.venue_a.name().to_string(),
                    side: Side::Sell,
                    submitted_at: Utc::now(),
                    requested_amount: amount,
                });
                let msg = format!(
                    "{pair}: sell {amount:.4} {} @ {:.2}, confidence {:.2} (down)",
                    pair.base,
                    quote.price,
                    1.0 - probability,
                );
                info!("{msg}");
                self.notifier.send(msg);
            }
            Err(e) => warn!(pair = %pair, error = %e, "Exit order failed"),
        }
    }

    /// Stop-loss exit: sell what the book will take of the whole position.
    async fn try_stop_loss(
        &self,
        pair: &Pair,
        state: &mut PairState,
        quote: &Quote,
        entry: f64,
        atr: f64,
        reason: StopReason,
    ) {
        let amount = state.ledger.base_qty.min(quote.amount);
        if amount <= 0.0 {
            return;
        }

        match self
            .venue_a
            .place_limit_order(pair, Side::Sell, amount, quote.price)
            .await
        {
            Ok(handle) => {
                state.open_orders.push(OpenOrder {
                    id: handle.id,
                    venue: self.venue_a.name().to_string(),
                    side: Side::Sell,
                    submitted_at: Utc::now(),
                    requested_amount: amount,
                });
                let msg = format!(
                    "{pair}: stop-loss ({reason}): sell {amount:.4} {} @ {:.2} (entry {entry:.2}, ATR {atr:.2})",
                    pair.base, quote.price,
                );
                info!("{msg}");
                self.notifier.send(msg);
            }
            Err(e) => warn!(pair = %pair, error = %e, "Stop-loss order failed"),
        }
    }

    // -- Shutdown path -------------------------------------------------------

    /// Reconcile once, then cancel whatever is still resting, regardless
    /// of age. Used by the shutdown path.
    pub async fn cancel_all(
        &self,
        pair: &Pair,
        state: &mut PairState,
        losses: &mut Vec<f64>,
    ) {
        self.reconcile_open_orders(pair, state, 0.0, losses).await;

        let mut retained = Vec::new();
        for order in state.open_orders.drain(..) {
            let Some(venue) = self.venue(&order.venue) else { continue };
            match venue.cancel_order(&order.id, pair).await {
                Ok(()) => {
                    info!(pair = %pair, order_id = %order.id, "Order cancelled at shutdown");
                }
                Err(e) => {
                    warn!(pair = %pair, order_id = %order.id, error = %e, "Shutdown cancel failed");
                    retained.push(order);
                }
            }
        }
        state.open_orders = retained;
    }

    /// Sell the entire residual position at market when it clears the
    /// minimum notional; below that the dust stays and is logged.
    pub async fn liquidate_residual(
        &self,
        pair: &Pair,
        state: &mut PairState,
    ) -> Result<(), TradeError> {
        let base_qty = state.ledger.base_qty;
        if base_qty <= 0.0 {
            return Ok(());
        }

        let name_a = self.venue_a.name().to_string();
        let ticker = self.venue_a.fetch_ticker(pair).await?;
        let notional = base_qty * ticker.ask;
        if notional < self.cfg.min_sell_notional {
            info!(
                pair = %pair,
                base_qty,
                notional,
                min = self.cfg.min_sell_notional,
                "Residual below minimum sell notional, leaving dust unsold"
            );
            return Ok(());
        }

        let handle = self
            .venue_a
            .place_market_order(pair, Side::Sell, base_qty)
            .await?;
        // Market fills report no fee on the handle; estimate with the
        // venue's maker rate so the ledger stays conservative.
        let fee = handle.filled * handle.price * self.fees.maker(&name_a, pair);
        state
            .ledger
            .apply_fill(&name_a, Side::Sell, handle.filled, handle.price, fee);

        let msg = format!(
            "{pair}: residual {:.4} {} liquidated @ {:.2}",
            handle.filled, pair.base, handle.price,
        );
        info!("{msg}");
        self.notifier.send(msg);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
