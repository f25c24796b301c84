//! Exchange venue integrations.
//!
//! Defines the `SpotVenue` capability trait — one method per exchange
//! operation — and provides signed REST implementations for:
//! - Binance spot (primary execution venue)
//! - BingX spot (secondary venue, cross-spread leg)
//!
//! Every method either fully succeeds or commits nothing: a failed call
//! maps to `TradeError::Transient` (network, rate-limit, 5xx) and the
//! engine treats the step as not having happened.

pub mod binance;
pub mod bingx;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;

use crate::data::Candle;
use crate::errors::TradeError;
use crate::types::{BalanceSheet, OrderBook, OrderHandle, OrderSnapshot, Pair, Side, Ticker};

/// Abstraction over spot exchange venues.
///
/// Implementors provide market data, balance queries, and the order
/// operations the lifecycle manager drives. All quantities are in base
/// currency, all prices and notionals in quote currency.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpotVenue: Send + Sync {
    /// Best bid/ask for a pair.
    async fn fetch_ticker(&self, pair: &Pair) -> Result<Ticker, TradeError>;

    /// Order book snapshot, best levels first, at most `depth` levels
    /// per side.
    async fn fetch_order_book(&self, pair: &Pair, depth: usize)
        -> Result<OrderBook, TradeError>;

    /// Recent OHLCV candles, oldest first.
    async fn fetch_candles(&self, pair: &Pair, limit: usize)
        -> Result<Vec<Candle>, TradeError>;

    /// Free/locked balances per asset.
    async fn fetch_balance(&self) -> Result<BalanceSheet, TradeError>;

    /// Maker fees for the given pairs. Venues that don't report a pair
    /// simply omit it; callers fall back to `DEFAULT_MAKER_FEE`.
    async fn fetch_fees(&self, pairs: &[Pair]) -> Result<HashMap<Pair, f64>, TradeError>;

    /// Place a limit order. Returns the venue's order handle.
    async fn place_limit_order(
        &self,
        pair: &Pair,
        side: Side,
        qty: f64,
        price: f64,
    ) -> Result<OrderHandle, TradeError>;

    /// Place a market order. The handle carries any immediate fill.
    async fn place_market_order(
        &self,
        pair: &Pair,
        side: Side,
        qty: f64,
    ) -> Result<OrderHandle, TradeError>;

    /// Current state of a previously placed order.
    async fn fetch_order(&self, id: &str, pair: &Pair) -> Result<OrderSnapshot, TradeError>;

    /// Cancel a resting order. Cancelling an already-terminal order is
    /// not an error.
    async fn cancel_order(&self, id: &str, pair: &Pair) -> Result<(), TradeError>;

    /// Venue name for logging and ledger keys.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Request signing
// ---------------------------------------------------------------------------

/// HMAC-SHA256 of `payload` keyed by `secret`, hex-encoded. Both venues
/// sign their query strings this way.
pub(crate) fn hmac_sha256_hex(secret: &str, payload: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(payload.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_sha256_hex_known_vector() {
        // RFC 4231 test case 2.
        let sig = hmac_sha256_hex("Jefe", "what do ya want for nothing?");
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hmac_differs_by_key() {
        let a = hmac_sha256_hex("key-a", "payload");
        let b = hmac_sha256_hex("key-b", "payload");
        assert_ne!(a, b);
    }
}
