//! Cycle orchestrator.
//!
//! Drives the scan → gate → allocate → trade → reconcile sequence over a
//! bounded or signal-terminated run. Owns every piece of shared state —
//! the per-pair states, the risk bookkeeping, the reference prices — and
//! partitions pair states 1:1 to tasks each cycle, which is what makes
//! the lock-free ledger contract sound.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::engine::allocator;
use crate::engine::ledger::PairLedger;
use crate::engine::risk::{RiskGate, RiskState};
use crate::engine::scanner::{PairAssessment, PairScanner};
use crate::engine::trader::{PairState, PairTrader, TraderConfig};
use crate::notify::Notifier;
use crate::oracle::Forecaster;
use crate::storage::{self, Snapshot};
use crate::types::{FeeTable, Pair};
use crate::venues::SpotVenue;

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Summary of one completed cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_number: u64,
    pub eligible: usize,
    pub selected: usize,
    pub skipped_by_gates: usize,
    pub fills: usize,
    pub cancellations: usize,
    pub mark_to_market: f64,
    pub halted: bool,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Final profit-and-loss summary emitted at shutdown.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub cycles: u64,
    pub initial_capital: f64,
    pub final_value: f64,
    pub total_fees: f64,
}

impl SessionReport {
    pub fn pnl(&self) -> f64 {
        self.final_value - self.initial_capital
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    scanner: PairScanner,
    trader: Arc<PairTrader>,
    gate: RiskGate,
    oracle: Arc<dyn Forecaster>,
    notifier: Notifier,
    states: HashMap<Pair, PairState>,
    risk_state: RiskState,
    venue_names: [String; 2],
    /// Last observed close per pair, used as the next cycle's
    /// mark-to-market reference.
    last_prices: HashMap<Pair, f64>,
    initial_capital: f64,
    max_open_orders: usize,
    state_file: Option<String>,
    cycle_count: u64,
    halted: bool,
}

impl Engine {
    pub fn new(
        cfg: &AppConfig,
        venue_a: Arc<dyn SpotVenue>,
        venue_b: Arc<dyn SpotVenue>,
        oracle: Arc<dyn Forecaster>,
        fees: FeeTable,
        notifier: Notifier,
        snapshot: Snapshot,
    ) -> Self {
        let venue_names = [venue_a.name().to_string(), venue_b.name().to_string()];
        let scanner = PairScanner::new(
            venue_a.clone(),
            venue_b.clone(),
            oracle.clone(),
            fees.clone(),
            cfg.strategy.clone(),
        );
        let trader = Arc::new(PairTrader::new(
            venue_a,
            venue_b,
            fees,
            TraderConfig::from_config(&cfg.strategy, &cfg.risk),
            notifier.clone(),
        ));
        let gate = RiskGate::new(&cfg.risk, snapshot.initial_capital);

        let states = snapshot
            .ledgers
            .into_iter()
            .map(|(pair, ledger)| (pair, PairState::new(ledger)))
            .collect();

        Self {
            scanner,
            trader,
            gate,
            oracle,
            notifier,
            states,
            risk_state: RiskState::new(&today()),
            venue_names,
            last_prices: HashMap::new(),
            initial_capital: snapshot.initial_capital,
            max_open_orders: cfg.risk.max_open_orders,
            state_file: cfg.agent.state_file.clone(),
            cycle_count: 0,
            halted: false,
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Read access to a pair's current state, for reporting and tests.
    pub fn pair_state(&self, pair: &Pair) -> Option<&PairState> {
        self.states.get(pair)
    }

    fn ledgers(&self) -> impl Iterator<Item = &PairLedger> {
        self.states.values().map(|s| &s.ledger)
    }

    /// Total mark-to-market value at the last known prices.
    fn mark_to_market(&self) -> f64 {
        self.ledgers()
            .map(|l| {
                let reference = self
                    .last_prices
                    .get(&l.pair)
                    .copied()
                    .or(l.entry_price)
                    .unwrap_or(0.0);
                l.mark_to_market(reference)
            })
            .sum()
    }

    // -- Cycle ---------------------------------------------------------------

    /// Run one full trading cycle. A `halted` report means the drawdown
    /// gate tripped and no further cycles may run.
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle_count += 1;
        info!(cycle = self.cycle_count, "Starting cycle");

        let mut report = CycleReport {
            cycle_number: self.cycle_count,
            eligible: 0,
            selected: 0,
            skipped_by_gates: 0,
            fills: 0,
            cancellations: 0,
            mark_to_market: 0.0,
            halted: false,
            timestamp: Utc::now(),
        };

        // 1. Global drawdown gate — fails closed, halts the session.
        let drawdown = self.gate.check_drawdown(self.ledgers(), &self.last_prices);
        if !drawdown.ok {
            error!(reason = %drawdown.reason, "Trading halted");
            self.notifier.send(format!("Trading halted: {}", drawdown.reason));
            self.halted = true;
            report.halted = true;
            report.mark_to_market = self.mark_to_market();
            return report;
        }

        // 2. Scan and rank candidates.
        let assessments = self.scanner.scan().await;
        report.eligible = assessments.len();
        for a in &assessments {
            self.last_prices.insert(a.score.pair.clone(), a.window.close);
        }

        // 3. Select the top candidates under the concurrency bound.
        let limit = self.gate.optimal_concurrency(self.ledgers());
        let selected: Vec<PairAssessment> = assessments.into_iter().take(limit).collect();
        let selected_pairs: Vec<Pair> =
            selected.iter().map(|a| a.score.pair.clone()).collect();
        if !selected_pairs.is_empty() {
            let names: Vec<String> =
                selected_pairs.iter().map(|p| p.to_string()).collect();
            self.notifier.send(format!(
                "Pairs selected for trading: {} (limit {limit})",
                names.join(", "),
            ));
        }

        // 4. Reallocate uncommitted quote capital by harmonic rank.
        {
            let venues: Vec<&str> = self.venue_names.iter().map(String::as_str).collect();
            let mut ledgers: Vec<&mut PairLedger> =
                self.states.values_mut().map(|s| &mut s.ledger).collect();
            allocator::reallocate(&mut ledgers, &selected_pairs, &venues);
        }

        // 5. Per-pair gates, then concurrent dispatch of the survivors.
        let mut dispatch = Vec::new();
        for assessment in selected {
            match self.admit_pair(&assessment).await {
                Ok(forecast) => dispatch.push((assessment, forecast)),
                Err(reason) => {
                    report.skipped_by_gates += 1;
                    warn!(pair = %assessment.score.pair, reason = %reason, "Pair skipped by gate");
                    self.notifier.send(reason);
                }
            }
        }
        report.selected = dispatch.len();

        let tasks = dispatch.into_iter().filter_map(|(assessment, forecast)| {
            let pair = assessment.score.pair.clone();
            let state = self.states.remove(&pair)?;
            let trader = self.trader.clone();
            Some(async move {
                let outcome = trader.trade_cycle(&assessment, forecast, state).await;
                (pair, outcome)
            })
        });

        // Fan in: every task returns its pair state, whatever happened.
        for (pair, outcome) in join_all(tasks).await {
            for loss in &outcome.realized_losses {
                self.risk_state.record_loss(&pair, *loss);
            }
            report.fills += outcome.fills;
            report.cancellations += outcome.cancellations;
            self.states.insert(pair, outcome.state);
        }

        report.mark_to_market = self.mark_to_market();
        self.persist();

        info!(
            cycle = report.cycle_number,
            eligible = report.eligible,
            selected = report.selected,
            skipped = report.skipped_by_gates,
            fills = report.fills,
            cancellations = report.cancellations,
            value = format!("{:.2}", report.mark_to_market),
            "Cycle complete"
        );

        report
    }

    /// Per-pair admission: daily-loss gate, volatility gate, and the
    /// open-order cap. Passing pairs get their loss forecast back so the
    /// trade task doesn't call the oracle twice.
    async fn admit_pair(&mut self, assessment: &PairAssessment) -> Result<f64, String> {
        let pair = &assessment.score.pair;
        let state = self
            .states
            .get(pair)
            .ok_or_else(|| format!("{pair}: no ledger state"))?;

        if state.open_orders.len() >= self.max_open_orders {
            return Err(format!(
                "{pair}: open order limit reached ({})",
                self.max_open_orders
            ));
        }

        let volatility =
            self.gate
                .check_volatility(pair, assessment.atr, assessment.avg_close);
        if !volatility.ok {
            return Err(volatility.reason);
        }

        let forecast = match self
            .oracle
            .forecast_loss(&assessment.window, self.risk_state.recent_losses(pair))
            .await
        {
            Ok(f) => f,
            Err(e) => {
                warn!(pair = %pair, error = %e, "Loss forecast failed, assuming zero");
                0.0
            }
        };

        let daily = self.gate.check_daily_loss(
            &mut self.risk_state,
            pair,
            &state.ledger,
            assessment.atr,
            forecast,
            &today(),
        );
        if !daily.ok {
            return Err(daily.reason);
        }

        Ok(forecast)
    }

    // -- Run loop ------------------------------------------------------------

    /// Drive cycles on a fixed interval until the drawdown gate halts,
    /// the cycle budget is exhausted, or the shutdown signal fires. Ends
    /// with the shutdown path in every case.
    pub async fn run(
        &mut self,
        interval: Duration,
        max_cycles: Option<u64>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> SessionReport {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_cycle().await;
                    if report.halted {
                        break;
                    }
                    if let Some(budget) = max_cycles {
                        if report.cycle_number >= budget {
                            info!(cycles = budget, "Cycle budget exhausted");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await
    }

    // -- Shutdown ------------------------------------------------------------

    /// Cancel every open order, liquidate residual positions, persist the
    /// final snapshot, zero the ledgers, and emit the P&L report.
    pub async fn shutdown(&mut self) -> SessionReport {
        info!("Shutting down: closing open orders and residual positions");
        self.notifier.send("Shutting down: closing all open orders.");

        let pairs: Vec<Pair> = self.states.keys().cloned().collect();
        for pair in pairs {
            let Some(mut state) = self.states.remove(&pair) else { continue };
            let mut losses = Vec::new();

            self.trader.cancel_all(&pair, &mut state, &mut losses).await;
            if let Err(e) = self.trader.liquidate_residual(&pair, &mut state).await {
                warn!(pair = %pair, error = %e, "Residual liquidation failed, dust remains");
            }

            for loss in losses {
                self.risk_state.record_loss(&pair, loss);
            }
            self.states.insert(pair, state);
        }

        let report = SessionReport {
            cycles: self.cycle_count,
            initial_capital: self.initial_capital,
            final_value: self.mark_to_market(),
            total_fees: self.ledgers().map(|l| l.total_fees).sum(),
        };

        // Persist the liquidated balances, then zero the session ledgers.
        self.persist();
        for state in self.states.values_mut() {
            state.ledger.zero();
        }

        let msg = format!(
            "Session closed after {} cycles. P&L: {:+.2} ({:.2} → {:.2}), fees {:.2}",
            report.cycles,
            report.pnl(),
            report.initial_capital,
            report.final_value,
            report.total_fees,
        );
        info!("{msg}");
        self.notifier.send(msg);

        report
    }

    fn persist(&self) {
        let snapshot = Snapshot {
            ledgers: self
                .states
                .iter()
                .map(|(pair, state)| (pair.clone(), state.ledger.clone()))
                .collect(),
            initial_capital: self.initial_capital,
        };
        if let Err(e) = storage::save_snapshot(&snapshot, self.state_file.as_deref()) {
            error!(error = %e, "Failed to save snapshot");
        }
    }
}

/// Wall-clock calendar date as the daily-loss reset key.
fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
