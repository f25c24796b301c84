//! Mock venue for integration testing.
//!
//! Provides a deterministic `SpotVenue` implementation with scripted
//! tickers, books, and candles, and an in-memory order lifecycle —
//! orders fill after a configurable number of polls, so tests can walk
//! an order through pending → filled/cancelled without a real exchange.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use arbiter::data::{Candle, FeatureWindow};
use arbiter::errors::TradeError;
use arbiter::oracle::Forecaster;
use arbiter::types::{
    AssetBalance, BalanceSheet, BookLevel, OrderBook, OrderHandle, OrderSnapshot, OrderStatus,
    Pair, Side, Ticker,
};
use arbiter::venues::SpotVenue;

/// Maker fee the mock charges on every fill.
pub const MOCK_FEE_RATE: f64 = 0.001;

/// How placed limit orders behave when polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// Fill on the Nth poll.
    AfterPolls(u32),
    /// Stay open until cancelled.
    Never,
}

#[derive(Debug, Clone)]
struct MockOrder {
    side: Side,
    qty: f64,
    price: f64,
    status: OrderStatus,
    polls: u32,
}

/// A deterministic in-memory venue. All knobs are controllable from
/// test code.
pub struct MockVenue {
    name: String,
    ticker: Mutex<Ticker>,
    candle_price: Mutex<f64>,
    fill_mode: Mutex<FillMode>,
    orders: Mutex<HashMap<String, MockOrder>>,
    next_id: AtomicU64,
    force_error: Mutex<Option<String>>,
}

impl MockVenue {
    pub fn new(name: &str, bid: f64, ask: f64) -> Self {
        Self {
            name: name.to_string(),
            ticker: Mutex::new(Ticker { bid, ask }),
            candle_price: Mutex::new((bid + ask) / 2.0),
            fill_mode: Mutex::new(FillMode::AfterPolls(1)),
            orders: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            force_error: Mutex::new(None),
        }
    }

    pub fn set_ticker(&self, bid: f64, ask: f64) {
        *self.ticker.lock().unwrap() = Ticker { bid, ask };
    }

    pub fn set_candle_price(&self, price: f64) {
        *self.candle_price.lock().unwrap() = price;
    }

    pub fn set_fill_mode(&self, mode: FillMode) {
        *self.fill_mode.lock().unwrap() = mode;
    }

    /// Force all subsequent operations to return a transient error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    pub fn open_order_count(&self) -> usize {
        self.orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.status == OrderStatus::Open)
            .count()
    }

    pub fn placed_order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    fn check_error(&self) -> Result<(), TradeError> {
        if let Some(msg) = self.force_error.lock().unwrap().as_ref() {
            return Err(TradeError::Transient(msg.clone()));
        }
        Ok(())
    }

    fn place(&self, side: Side, qty: f64, price: f64) -> OrderHandle {
        let id = format!("{}-{}", self.name, self.next_id.fetch_add(1, Ordering::SeqCst));
        self.orders.lock().unwrap().insert(
            id.clone(),
            MockOrder { side, qty, price, status: OrderStatus::Open, polls: 0 },
        );
        OrderHandle { id, filled: 0.0, price: 0.0 }
    }
}

#[async_trait]
impl SpotVenue for MockVenue {
    async fn fetch_ticker(&self, _pair: &Pair) -> Result<Ticker, TradeError> {
        self.check_error()?;
        Ok(*self.ticker.lock().unwrap())
    }

    async fn fetch_order_book(&self, _pair: &Pair, depth: usize)
        -> Result<OrderBook, TradeError>
    {
        self.check_error()?;
        let ticker = *self.ticker.lock().unwrap();
        // A deep, evenly stepped book around the current ticker.
        let level = |price: f64| BookLevel { price, qty: 100.0 };
        Ok(OrderBook {
            bids: (0..depth.max(1))
                .map(|i| level(ticker.bid * (1.0 - 0.001 * i as f64)))
                .collect(),
            asks: (0..depth.max(1))
                .map(|i| level(ticker.ask * (1.0 + 0.001 * i as f64)))
                .collect(),
        })
    }

    async fn fetch_candles(&self, _pair: &Pair, limit: usize)
        -> Result<Vec<Candle>, TradeError>
    {
        self.check_error()?;
        let price = *self.candle_price.lock().unwrap();
        Ok((0..limit.max(60))
            .map(|i| Candle {
                ts: i as i64 * 300_000,
                open: price,
                high: price + 1.0,
                low: price - 1.0,
                close: price,
                volume: 10.0,
            })
            .collect())
    }

    async fn fetch_balance(&self) -> Result<BalanceSheet, TradeError> {
        self.check_error()?;
        Ok(BalanceSheet::from([(
            "USDT".to_string(),
            AssetBalance { free: 1000.0, locked: 0.0 },
        )]))
    }

    async fn fetch_fees(&self, pairs: &[Pair]) -> Result<HashMap<Pair, f64>, TradeError> {
        self.check_error()?;
        Ok(pairs.iter().map(|p| (p.clone(), MOCK_FEE_RATE)).collect())
    }

    async fn place_limit_order(
        &self,
        _pair: &Pair,
        side: Side,
        qty: f64,
        price: f64,
    ) -> Result<OrderHandle, TradeError> {
        self.check_error()?;
        Ok(self.place(side, qty, price))
    }

    async fn place_market_order(
        &self,
        _pair: &Pair,
        side: Side,
        qty: f64,
    ) -> Result<OrderHandle, TradeError> {
        self.check_error()?;
        let ticker = *self.ticker.lock().unwrap();
        let price = match side {
            Side::Buy => ticker.ask,
            Side::Sell => ticker.bid,
        };
        let handle = self.place(side, qty, price);
        // Market orders fill immediately.
        if let Some(order) = self.orders.lock().unwrap().get_mut(&handle.id) {
            order.status = OrderStatus::Closed;
        }
        Ok(OrderHandle { id: handle.id, filled: qty, price })
    }

    async fn fetch_order(&self, id: &str, _pair: &Pair) -> Result<OrderSnapshot, TradeError> {
        self.check_error()?;
        let fill_mode = *self.fill_mode.lock().unwrap();
        let mut orders = self.orders.lock().unwrap();
        let order = orders
            .get_mut(id)
            .ok_or_else(|| TradeError::Transient(format!("unknown order {id}")))?;

        if order.status == OrderStatus::Open {
            order.polls += 1;
            if let FillMode::AfterPolls(n) = fill_mode {
                if order.polls >= n {
                    order.status = OrderStatus::Closed;
                }
            }
        }

        let filled = if order.status == OrderStatus::Closed { order.qty } else { 0.0 };
        Ok(OrderSnapshot {
            id: id.to_string(),
            status: order.status,
            side: order.side,
            filled,
            price: order.price,
            fee: filled * order.price * MOCK_FEE_RATE,
        })
    }

    async fn cancel_order(&self, id: &str, _pair: &Pair) -> Result<(), TradeError> {
        self.check_error()?;
        if let Some(order) = self.orders.lock().unwrap().get_mut(id) {
            if order.status == OrderStatus::Open {
                order.status = OrderStatus::Canceled;
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Stub forecaster
// ---------------------------------------------------------------------------

/// Fixed-output oracle for simulations.
pub struct StubForecaster {
    pub probability: f64,
    pub loss: f64,
}

impl StubForecaster {
    pub fn new(probability: f64) -> Self {
        Self { probability, loss: 0.0 }
    }
}

#[async_trait]
impl Forecaster for StubForecaster {
    async fn predict(&self, _window: &FeatureWindow) -> anyhow::Result<f64> {
        Ok(self.probability)
    }

    async fn forecast_loss(
        &self,
        _window: &FeatureWindow,
        _recent_losses: &[f64],
    ) -> anyhow::Result<f64> {
        Ok(self.loss)
    }

    fn name(&self) -> &str {
        "stub"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> Pair {
        "ETH/USDT".parse().unwrap()
    }

    #[tokio::test]
    async fn test_mock_order_fills_after_polls() {
        let venue = MockVenue::new("mock", 100.0, 100.1);
        venue.set_fill_mode(FillMode::AfterPolls(2));

        let handle = venue
            .place_limit_order(&pair(), Side::Buy, 0.5, 100.0)
            .await
            .unwrap();

        let first = venue.fetch_order(&handle.id, &pair()).await.unwrap();
        assert_eq!(first.status, OrderStatus::Open);
        assert_eq!(first.filled, 0.0);

        let second = venue.fetch_order(&handle.id, &pair()).await.unwrap();
        assert_eq!(second.status, OrderStatus::Closed);
        assert_eq!(second.filled, 0.5);
        assert!((second.fee - 0.5 * 100.0 * MOCK_FEE_RATE).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_mock_never_fill_then_cancel() {
        let venue = MockVenue::new("mock", 100.0, 100.1);
        venue.set_fill_mode(FillMode::Never);

        let handle = venue
            .place_limit_order(&pair(), Side::Sell, 1.0, 101.0)
            .await
            .unwrap();
        for _ in 0..5 {
            let snap = venue.fetch_order(&handle.id, &pair()).await.unwrap();
            assert_eq!(snap.status, OrderStatus::Open);
        }

        venue.cancel_order(&handle.id, &pair()).await.unwrap();
        let snap = venue.fetch_order(&handle.id, &pair()).await.unwrap();
        assert_eq!(snap.status, OrderStatus::Canceled);
        assert_eq!(venue.open_order_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_market_order_fills_immediately() {
        let venue = MockVenue::new("mock", 99.5, 100.5);
        let handle = venue
            .place_market_order(&pair(), Side::Sell, 2.0)
            .await
            .unwrap();
        assert_eq!(handle.filled, 2.0);
        assert_eq!(handle.price, 99.5); // sells hit the bid
    }

    #[tokio::test]
    async fn test_mock_forced_error() {
        let venue = MockVenue::new("mock", 100.0, 100.1);
        venue.set_error("simulated outage");

        assert!(venue.fetch_ticker(&pair()).await.is_err());
        assert!(venue.place_limit_order(&pair(), Side::Buy, 1.0, 100.0).await.is_err());

        venue.clear_error();
        assert!(venue.fetch_ticker(&pair()).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_book_wraps_ticker() {
        let venue = MockVenue::new("mock", 100.0, 100.2);
        let book = venue.fetch_order_book(&pair(), 5).await.unwrap();
        assert_eq!(book.bids.len(), 5);
        assert_eq!(book.asks.len(), 5);
        assert_eq!(book.bids[0].price, 100.0);
        assert_eq!(book.asks[0].price, 100.2);
        assert!(book.bids[1].price < book.bids[0].price);
    }
}
