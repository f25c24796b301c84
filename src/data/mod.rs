//! Market data: candles, technical indicators, and oracle feature windows.
//!
//! Indicators operate on plain slices so they stay trivially testable.
//! The feature window is the only thing the oracle ever sees — the engine
//! never interprets individual indicator values beyond ATR and average
//! close, which the risk gate consumes directly.

use serde::{Deserialize, Serialize};

use crate::errors::TradeError;

// ---------------------------------------------------------------------------
// Candles
// ---------------------------------------------------------------------------

/// One OHLCV candle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    /// Open time, unix milliseconds.
    pub ts: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// ATR lookback used throughout the engine.
pub const ATR_PERIOD: usize = 14;
/// RSI lookback.
pub const RSI_PERIOD: usize = 14;
/// Bollinger band lookback.
pub const BB_PERIOD: usize = 20;

// ---------------------------------------------------------------------------
// Indicators
// ---------------------------------------------------------------------------

/// Simple moving average of the last `period` values.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Exponential moving average over the whole series.
pub fn ema(values: &[f64], span: usize) -> Option<f64> {
    if values.is_empty() || span == 0 {
        return None;
    }
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut acc = values[0];
    for v in &values[1..] {
        acc = alpha * v + (1.0 - alpha) * acc;
    }
    Some(acc)
}

/// Relative Strength Index over closes.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if closes.len() < period + 1 {
        return None;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    let window = &closes[closes.len() - period - 1..];
    for w in window.windows(2) {
        let delta = w[1] - w[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    if losses == 0.0 {
        return Some(100.0);
    }
    let rs = gains / losses;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line (EMA12 − EMA26) and its EMA9 signal line.
pub fn macd(closes: &[f64]) -> Option<(f64, f64)> {
    if closes.len() < 26 {
        return None;
    }
    // Signal is the EMA9 of the MACD series, so build the series first.
    let mut macd_series = Vec::with_capacity(closes.len());
    let alpha12 = 2.0 / 13.0;
    let alpha26 = 2.0 / 27.0;
    let mut e12 = closes[0];
    let mut e26 = closes[0];
    for c in closes {
        e12 = alpha12 * c + (1.0 - alpha12) * e12;
        e26 = alpha26 * c + (1.0 - alpha26) * e26;
        macd_series.push(e12 - e26);
    }
    let line = *macd_series.last()?;
    let signal = ema(&macd_series, 9)?;
    Some((line, signal))
}

/// Bollinger bands: (upper, lower) at ±2 standard deviations.
pub fn bollinger(closes: &[f64], period: usize) -> Option<(f64, f64)> {
    let mid = sma(closes, period)?;
    let window = &closes[closes.len() - period..];
    let var =
        window.iter().map(|c| (c - mid).powi(2)).sum::<f64>() / period as f64;
    let std = var.sqrt();
    Some((mid + 2.0 * std, mid - 2.0 * std))
}

/// Average True Range over the last `period` candles.
///
/// TR = max(high − low, |high − prev close|, |low − prev close|),
/// averaged with a simple rolling mean.
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let start = candles.len() - period;
    let mut sum = 0.0;
    for i in start..candles.len() {
        let c = candles[i];
        let prev_close = candles[i - 1].close;
        let tr = (c.high - c.low)
            .max((c.high - prev_close).abs())
            .max((c.low - prev_close).abs());
        sum += tr;
    }
    Some(sum / period as f64)
}

/// Mean close over the whole window.
pub fn average_close(candles: &[Candle]) -> Option<f64> {
    if candles.is_empty() {
        return None;
    }
    Some(candles.iter().map(|c| c.close).sum::<f64>() / candles.len() as f64)
}

// ---------------------------------------------------------------------------
// Feature window
// ---------------------------------------------------------------------------

/// The indicator snapshot handed to the oracle.
///
/// Serialized as the request body of the sidecar's `/predict` and
/// `/forecast-loss` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureWindow {
    pub pair: String,
    pub close: f64,
    pub ma10: f64,
    pub ma50: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub bb_upper: f64,
    pub bb_lower: f64,
    pub atr: f64,
    pub volume: f64,
    /// Live relative spread on the primary venue.
    pub spread: f64,
}

impl FeatureWindow {
    /// Build a feature window from a candle history.
    ///
    /// Fails with `StaleData` when the history is too short for the
    /// slowest indicator — the pair is skipped for the cycle.
    pub fn from_candles(
        pair: &crate::types::Pair,
        candles: &[Candle],
        spread: f64,
    ) -> Result<Self, TradeError> {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let stale = |what: &str| {
            TradeError::StaleData(format!(
                "{pair}: {what} unavailable over {} candles",
                candles.len()
            ))
        };

        let ma10 = sma(&closes, 10).ok_or_else(|| stale("MA10"))?;
        let ma50 = sma(&closes, 50).ok_or_else(|| stale("MA50"))?;
        let rsi_v = rsi(&closes, RSI_PERIOD).ok_or_else(|| stale("RSI"))?;
        let (macd_v, macd_sig) = macd(&closes).ok_or_else(|| stale("MACD"))?;
        let (bb_upper, bb_lower) =
            bollinger(&closes, BB_PERIOD).ok_or_else(|| stale("Bollinger"))?;
        let atr_v = atr(candles, ATR_PERIOD).ok_or_else(|| stale("ATR"))?;

        Ok(Self {
            pair: pair.to_string(),
            close: *closes.last().unwrap(),
            ma10,
            ma50,
            rsi: rsi_v,
            macd: macd_v,
            macd_signal: macd_sig,
            bb_upper,
            bb_lower,
            atr: atr_v,
            volume: candles.last().unwrap().volume,
            spread,
        })
    }

    /// Bollinger band width, a volatility proxy the loss forecaster uses.
    pub fn bb_width(&self) -> f64 {
        self.bb_upper - self.bb_lower
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Pair;

    fn flat_candles(n: usize, price: f64) -> Vec<Candle> {
        (0..n)
            .map(|i| Candle {
                ts: i as i64 * 300_000,
                open: price,
                high: price + 1.0,
                low: price - 1.0,
                close: price,
                volume: 10.0,
            })
            .collect()
    }

    #[test]
    fn test_sma_basic() {
        let v = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&v, 5), Some(3.0));
        assert_eq!(sma(&v, 2), Some(4.5));
        assert_eq!(sma(&v, 6), None);
        assert_eq!(sma(&v, 0), None);
    }

    #[test]
    fn test_atr_flat_market() {
        // high-low is constantly 2.0, prev-close terms are 1.0 → TR = 2.0.
        let candles = flat_candles(20, 100.0);
        let a = atr(&candles, ATR_PERIOD).unwrap();
        assert!((a - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_needs_period_plus_one() {
        let candles = flat_candles(ATR_PERIOD, 100.0);
        assert!(atr(&candles, ATR_PERIOD).is_none());
        let candles = flat_candles(ATR_PERIOD + 1, 100.0);
        assert!(atr(&candles, ATR_PERIOD).is_some());
    }

    #[test]
    fn test_atr_gap_uses_prev_close() {
        // Second candle gaps up: TR must use |high - prev_close|.
        let candles = vec![
            Candle { ts: 0, open: 100.0, high: 101.0, low: 99.0, close: 100.0, volume: 1.0 },
            Candle { ts: 1, open: 110.0, high: 112.0, low: 109.0, close: 111.0, volume: 1.0 },
        ];
        let a = atr(&candles, 1).unwrap();
        assert!((a - 12.0).abs() < 1e-9); // 112 - 100
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&closes, RSI_PERIOD), Some(100.0));
    }

    #[test]
    fn test_rsi_balanced_is_50() {
        // Alternating +1/-1 deltas → equal gains and losses.
        let mut closes = vec![100.0];
        for i in 0..20 {
            let last = *closes.last().unwrap();
            closes.push(if i % 2 == 0 { last + 1.0 } else { last - 1.0 });
        }
        let r = rsi(&closes, 14).unwrap();
        assert!((r - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_bollinger_flat_series_collapses() {
        let closes = vec![50.0; 25];
        let (upper, lower) = bollinger(&closes, BB_PERIOD).unwrap();
        assert!((upper - 50.0).abs() < 1e-9);
        assert!((lower - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_macd_flat_series_is_zero() {
        let closes = vec![50.0; 40];
        let (line, signal) = macd(&closes).unwrap();
        assert!(line.abs() < 1e-9);
        assert!(signal.abs() < 1e-9);
    }

    #[test]
    fn test_feature_window_from_candles() {
        let pair = Pair::new("ETH", "USDT");
        let candles = flat_candles(60, 2000.0);
        let fw = FeatureWindow::from_candles(&pair, &candles, 0.001).unwrap();

        assert_eq!(fw.pair, "ETH/USDT");
        assert_eq!(fw.close, 2000.0);
        assert!((fw.ma10 - 2000.0).abs() < 1e-9);
        assert!((fw.atr - 2.0).abs() < 1e-9);
        assert!((fw.spread - 0.001).abs() < 1e-12);
        assert!(fw.bb_width() < 1e-9);
    }

    #[test]
    fn test_feature_window_short_history_is_stale() {
        let pair = Pair::new("ETH", "USDT");
        let candles = flat_candles(30, 2000.0); // too short for MA50
        let err = FeatureWindow::from_candles(&pair, &candles, 0.0).unwrap_err();
        assert!(matches!(err, TradeError::StaleData(_)));
        assert!(err.to_string().contains("ETH/USDT"));
    }

    #[test]
    fn test_average_close() {
        let candles = flat_candles(10, 42.0);
        assert_eq!(average_close(&candles), Some(42.0));
        assert_eq!(average_close(&[]), None);
    }
}
