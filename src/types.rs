//! Shared types for the ARBITER engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that venue, strategy, and engine
//! modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Trading pair
// ---------------------------------------------------------------------------

/// A spot trading pair, e.g. `ETH/USDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    pub base: String,
    pub quote: String,
}

impl Pair {
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: base.to_uppercase(),
            quote: quote.to_uppercase(),
        }
    }

    /// Venue-agnostic symbol without the separator, e.g. `ETHUSDT`.
    pub fn symbol(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

impl std::str::FromStr for Pair {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, quote) = s
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("Invalid pair (expected BASE/QUOTE): {s}"))?;
        if base.is_empty() || quote.is_empty() {
            anyhow::bail!("Invalid pair (empty side): {s}");
        }
        Ok(Pair::new(base, quote))
    }
}

impl TryFrom<String> for Pair {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Pair> for String {
    fn from(p: Pair) -> String {
        p.to_string()
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Venue-reported order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Resting on the book (includes partially filled).
    Open,
    /// Fully filled.
    Closed,
    /// Cancelled by us or by the venue.
    Canceled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Open => write!(f, "open"),
            OrderStatus::Closed => write!(f, "closed"),
            OrderStatus::Canceled => write!(f, "canceled"),
        }
    }
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// Best bid/ask for a pair on one venue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ticker {
    pub bid: f64,
    pub ask: f64,
}

impl Ticker {
    /// Relative spread between ask and bid, measured against the bid.
    pub fn relative_spread(&self) -> f64 {
        if self.bid <= 0.0 {
            return 0.0;
        }
        (self.ask - self.bid) / self.bid
    }

    /// A ticker is usable only when both sides are quoted.
    pub fn is_usable(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0 && self.ask >= self.bid
    }
}

/// One price level of an order book.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub qty: f64,
}

/// Order book snapshot, best levels first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderBook {
    pub bids: Vec<BookLevel>,
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Levels quoted against when pricing an order of the given side:
    /// buys are priced off the bids, sells off the asks.
    pub fn levels(&self, side: Side) -> &[BookLevel] {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }
}

/// Free/locked balance of a single asset on one venue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AssetBalance {
    pub free: f64,
    pub locked: f64,
}

/// Full balance snapshot: asset code → balance.
pub type BalanceSheet = HashMap<String, AssetBalance>;

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Handle returned by the venue on order placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderHandle {
    pub id: String,
    /// Quantity already filled at placement time (market orders).
    pub filled: f64,
    /// Average fill price when `filled > 0`.
    pub price: f64,
}

/// Venue-side view of an order, polled during reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSnapshot {
    pub id: String,
    pub status: OrderStatus,
    pub side: Side,
    pub filled: f64,
    pub price: f64,
    pub fee: f64,
}

/// An order we placed and are still tracking. Owned exclusively by the
/// pair's order queue; removed once terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    pub venue: String,
    pub side: Side,
    pub submitted_at: DateTime<Utc>,
    pub requested_amount: f64,
}

impl OpenOrder {
    /// Age of the order at `now`, in seconds.
    pub fn age_secs(&self, now: DateTime<Utc>) -> f64 {
        (now - self.submitted_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Order timeout scales with volatility: calm markets get the floor,
/// volatile ones more room to fill.
pub fn order_timeout_secs(atr: f64) -> f64 {
    (atr * 60.0).max(120.0)
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Per-cycle candidate ranking entry. Consumed by the allocator and
/// discarded at the end of the cycle.
#[derive(Debug, Clone)]
pub struct CandidateScore {
    pub pair: Pair,
    pub composite_score: f64,
    pub spread: f64,
    pub probability: f64,
    /// ATR divided by average close — the volatility the risk gate sees.
    pub atr_volatility: f64,
}

impl fmt::Display for CandidateScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (score: {:.4} | spread: {:.3}% | prob: {:.2})",
            self.pair,
            self.composite_score,
            self.spread * 100.0,
            self.probability,
        )
    }
}

// ---------------------------------------------------------------------------
// Fees
// ---------------------------------------------------------------------------

/// Maker fee lookup, keyed by venue then pair, fetched once at startup.
#[derive(Debug, Clone, Default)]
pub struct FeeTable {
    fees: HashMap<String, HashMap<Pair, f64>>,
}

/// Fallback maker fee when a venue does not report one for a pair.
pub const DEFAULT_MAKER_FEE: f64 = 0.001;

impl FeeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, venue: &str, pair: Pair, maker: f64) {
        self.fees.entry(venue.to_string()).or_default().insert(pair, maker);
    }

    pub fn maker(&self, venue: &str, pair: &Pair) -> f64 {
        self.fees
            .get(venue)
            .and_then(|m| m.get(pair))
            .copied()
            .unwrap_or(DEFAULT_MAKER_FEE)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
