//! Cross-venue pair scanner and scorer.
//!
//! For every configured pair: fetch both venues' tickers, compute the
//! cross-venue spread, build the oracle feature window from the primary
//! venue's candles, and score the pair. Eligible pairs come back sorted
//! by composite score for the allocator.
//!
//! A failure on one pair skips that pair for the cycle — it never
//! aborts the scan.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::StrategyConfig;
use crate::data::{self, FeatureWindow, ATR_PERIOD};
use crate::errors::TradeError;
use crate::oracle::Forecaster;
use crate::types::{CandidateScore, FeeTable, Pair};
use crate::venues::SpotVenue;

// ---------------------------------------------------------------------------
// Assessment
// ---------------------------------------------------------------------------

/// Everything the cycle needs to know about one scanned pair: the score
/// for ranking plus the volatility figures and feature window the risk
/// gate and trader reuse, so nothing is fetched twice.
#[derive(Debug, Clone)]
pub struct PairAssessment {
    pub score: CandidateScore,
    pub atr: f64,
    pub avg_close: f64,
    pub window: FeatureWindow,
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct PairScanner {
    venue_a: Arc<dyn SpotVenue>,
    venue_b: Arc<dyn SpotVenue>,
    oracle: Arc<dyn Forecaster>,
    fees: FeeTable,
    cfg: StrategyConfig,
}

impl PairScanner {
    pub fn new(
        venue_a: Arc<dyn SpotVenue>,
        venue_b: Arc<dyn SpotVenue>,
        oracle: Arc<dyn Forecaster>,
        fees: FeeTable,
        cfg: StrategyConfig,
    ) -> Self {
        Self { venue_a, venue_b, oracle, fees, cfg }
    }

    /// Spread earned by buying at `bid_a` on one venue and selling into
    /// `ask_b` on the other. Zero when the quote relationship is
    /// inverted — there is nothing to capture in that direction.
    fn cross_spread(bid_a: f64, ask_b: f64) -> f64 {
        if bid_a > 0.0 && ask_b > 0.0 && bid_a < ask_b {
            (ask_b - bid_a) / bid_a.min(ask_b)
        } else {
            0.0
        }
    }

    /// Minimum actionable spread for a pair: both venues' maker fees
    /// plus the configured safety margin.
    pub fn min_spread(&self, pair: &Pair) -> f64 {
        self.fees.maker(self.venue_a.name(), pair)
            + self.fees.maker(self.venue_b.name(), pair)
            + self.cfg.spread_safety_margin
    }

    /// Scan all configured pairs and return the eligible ones, sorted by
    /// composite score descending.
    pub async fn scan(&self) -> Vec<PairAssessment> {
        let mut assessments = Vec::new();

        for pair in &self.cfg.pairs {
            match self.assess(pair).await {
                Ok(Some(a)) => {
                    debug!(candidate = %a.score, "Pair eligible");
                    assessments.push(a);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(pair = %pair, error = %e, "Pair scan failed, skipping for this cycle");
                }
            }
        }

        assessments.sort_by(|a, b| {
            b.score
                .composite_score
                .partial_cmp(&a.score.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        info!(
            scanned = self.cfg.pairs.len(),
            eligible = assessments.len(),
            "Pair scan complete"
        );

        assessments
    }

    /// Score a single pair. `Ok(None)` means scanned but not eligible.
    async fn assess(&self, pair: &Pair) -> Result<Option<PairAssessment>, TradeError> {
        let ticker_a = self.venue_a.fetch_ticker(pair).await?;
        let ticker_b = self.venue_b.fetch_ticker(pair).await?;
        if !ticker_a.is_usable() || !ticker_b.is_usable() {
            return Err(TradeError::StaleData(format!("{pair}: unusable ticker")));
        }

        let spread = Self::cross_spread(ticker_a.bid, ticker_b.ask)
            .max(Self::cross_spread(ticker_b.bid, ticker_a.ask));

        let candles = self
            .venue_a
            .fetch_candles(pair, self.cfg.lookback)
            .await?;
        let atr = data::atr(&candles, ATR_PERIOD)
            .ok_or_else(|| TradeError::StaleData(format!("{pair}: ATR unavailable")))?;
        let avg_close = data::average_close(&candles)
            .ok_or_else(|| TradeError::StaleData(format!("{pair}: no candles")))?;

        let window = FeatureWindow::from_candles(pair, &candles, ticker_a.relative_spread())?;
        let probability = self
            .oracle
            .predict(&window)
            .await
            .map_err(|e| TradeError::StaleData(format!("{pair}: oracle predict: {e}")))?;

        let eligible =
            spread > self.min_spread(pair) || probability > self.cfg.prediction_threshold;
        if !eligible {
            debug!(
                pair = %pair,
                spread = format!("{:.4}%", spread * 100.0),
                min_spread = format!("{:.4}%", self.min_spread(pair) * 100.0),
                probability,
                "Pair not eligible"
            );
            return Ok(None);
        }

        let score = CandidateScore {
            pair: pair.clone(),
            composite_score: spread * 100.0 + probability,
            spread,
            probability,
            atr_volatility: atr / avg_close,
        };

        Ok(Some(PairAssessment { score, atr, avg_close, window }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
