//! Binance spot REST client.
//!
//! API docs: https://binance-docs.github.io/apidocs/spot/en/
//! Base URL: https://api.binance.com (testnet: https://testnet.binance.vision)
//! Auth: `X-MBX-APIKEY` header; signed endpoints append an HMAC-SHA256
//! signature over the query string.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use super::{hmac_sha256_hex, SpotVenue};
use crate::data::Candle;
use crate::errors::TradeError;
use crate::types::{
    AssetBalance, BalanceSheet, BookLevel, OrderBook, OrderHandle, OrderSnapshot, OrderStatus,
    Pair, Side, Ticker,
};

const MAINNET_URL: &str = "https://api.binance.com";
const TESTNET_URL: &str = "https://testnet.binance.vision";
const VENUE_NAME: &str = "binance";

/// Candle interval used for feature windows.
const KLINE_INTERVAL: &str = "5m";

/// Signature freshness window accepted by the venue, milliseconds.
const RECV_WINDOW_MS: u64 = 5_000;

// ---------------------------------------------------------------------------
// API response types (Binance JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTicker {
    bid_price: String,
    ask_price: String,
}

#[derive(Debug, Deserialize)]
struct Depth {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct Account {
    balances: Vec<RawBalance>,
}

#[derive(Debug, Deserialize)]
struct RawBalance {
    asset: String,
    free: String,
    locked: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    order_id: i64,
    status: String,
    side: String,
    executed_qty: String,
    cummulative_quote_qty: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTrade {
    commission: String,
}

#[derive(Debug, Deserialize)]
struct TradeFee {
    symbol: String,
    #[serde(rename = "makerCommission")]
    maker_commission: String,
}

fn parse_f64(s: &str, what: &str) -> Result<f64, TradeError> {
    s.parse::<f64>()
        .map_err(|_| TradeError::Transient(format!("binance: unparsable {what}: {s}")))
}

fn map_status(status: &str) -> OrderStatus {
    match status {
        "NEW" | "PARTIALLY_FILLED" => OrderStatus::Open,
        "FILLED" => OrderStatus::Closed,
        _ => OrderStatus::Canceled, // CANCELED, EXPIRED, REJECTED
    }
}

fn map_side(side: &str) -> Side {
    if side.eq_ignore_ascii_case("buy") {
        Side::Buy
    } else {
        Side::Sell
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BinanceVenue {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: SecretString,
}

impl BinanceVenue {
    pub fn new(api_key: String, api_secret: SecretString, testnet: bool) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: if testnet { TESTNET_URL } else { MAINNET_URL }.to_string(),
            api_key,
            api_secret,
        })
    }

    fn transient(e: impl std::fmt::Display, op: &str) -> TradeError {
        TradeError::Transient(format!("binance {op}: {e}"))
    }

    /// Public (unsigned) GET.
    async fn get_public<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &str,
    ) -> Result<T, TradeError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::transient(e, path))?;
        if !resp.status().is_success() {
            return Err(Self::transient(resp.status(), path));
        }
        resp.json().await.map_err(|e| Self::transient(e, path))
    }

    /// Signed request: appends `timestamp`, `recvWindow`, and the HMAC
    /// signature, then dispatches with the API-key header.
    async fn send_signed<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<T, TradeError> {
        params.push(("timestamp".into(), Utc::now().timestamp_millis().to_string()));
        params.push(("recvWindow".into(), RECV_WINDOW_MS.to_string()));

        let query: String = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let signature = hmac_sha256_hex(self.api_secret.expose_secret(), &query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let resp = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Self::transient(e, path))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::transient(format!("{status}: {body}"), path));
        }
        resp.json().await.map_err(|e| Self::transient(e, path))
    }

    /// Sum of commissions across the trades that filled an order. The
    /// order endpoint itself does not report fees.
    async fn fetch_order_fee(&self, order_id: &str, pair: &Pair) -> Result<f64, TradeError> {
        let trades: Vec<RawTrade> = self
            .send_signed(
                reqwest::Method::GET,
                "/api/v3/myTrades",
                vec![
                    ("symbol".into(), pair.symbol()),
                    ("orderId".into(), order_id.to_string()),
                ],
            )
            .await?;
        let mut fee = 0.0;
        for t in &trades {
            fee += parse_f64(&t.commission, "commission")?;
        }
        Ok(fee)
    }
}

#[async_trait]
impl SpotVenue for BinanceVenue {
    async fn fetch_ticker(&self, pair: &Pair) -> Result<Ticker, TradeError> {
        let raw: BookTicker = self
            .get_public("/api/v3/ticker/bookTicker", &format!("symbol={}", pair.symbol()))
            .await?;
        Ok(Ticker {
            bid: parse_f64(&raw.bid_price, "bid")?,
            ask: parse_f64(&raw.ask_price, "ask")?,
        })
    }

    async fn fetch_order_book(&self, pair: &Pair, depth: usize)
        -> Result<OrderBook, TradeError>
    {
        let raw: Depth = self
            .get_public(
                "/api/v3/depth",
                &format!("symbol={}&limit={}", pair.symbol(), depth.clamp(1, 100)),
            )
            .await?;
        let convert = |levels: Vec<(String, String)>| -> Result<Vec<BookLevel>, TradeError> {
            levels
                .into_iter()
                .map(|(p, q)| {
                    Ok(BookLevel { price: parse_f64(&p, "price")?, qty: parse_f64(&q, "qty")? })
                })
                .collect()
        };
        Ok(OrderBook { bids: convert(raw.bids)?, asks: convert(raw.asks)? })
    }

    async fn fetch_candles(&self, pair: &Pair, limit: usize)
        -> Result<Vec<Candle>, TradeError>
    {
        // Klines come back as positional JSON arrays.
        let raw: Vec<serde_json::Value> = self
            .get_public(
                "/api/v3/klines",
                &format!(
                    "symbol={}&interval={}&limit={}",
                    pair.symbol(),
                    KLINE_INTERVAL,
                    limit.clamp(1, 1000)
                ),
            )
            .await?;

        let field = |row: &serde_json::Value, idx: usize| -> Result<f64, TradeError> {
            let v = &row[idx];
            if let Some(s) = v.as_str() {
                return parse_f64(s, "kline field");
            }
            v.as_f64()
                .ok_or_else(|| TradeError::Transient(format!("binance: bad kline field {idx}")))
        };

        let mut candles = Vec::with_capacity(raw.len());
        for row in &raw {
            candles.push(Candle {
                ts: row[0].as_i64().unwrap_or_default(),
                open: field(row, 1)?,
                high: field(row, 2)?,
                low: field(row, 3)?,
                close: field(row, 4)?,
                volume: field(row, 5)?,
            });
        }
        Ok(candles)
    }

    async fn fetch_balance(&self) -> Result<BalanceSheet, TradeError> {
        let account: Account = self
            .send_signed(reqwest::Method::GET, "/api/v3/account", Vec::new())
            .await?;
        let mut sheet = BalanceSheet::new();
        for b in account.balances {
            let free = parse_f64(&b.free, "free")?;
            let locked = parse_f64(&b.locked, "locked")?;
            if free > 0.0 || locked > 0.0 {
                sheet.insert(b.asset, AssetBalance { free, locked });
            }
        }
        Ok(sheet)
    }

    async fn fetch_fees(&self, pairs: &[Pair]) -> Result<HashMap<Pair, f64>, TradeError> {
        // The trade-fee endpoint is unavailable on testnet; callers fall
        // back to the default maker fee when a pair is missing.
        let raw: Vec<TradeFee> = match self
            .send_signed(reqwest::Method::GET, "/sapi/v1/asset/tradeFee", Vec::new())
            .await
        {
            Ok(fees) => fees,
            Err(e) => {
                warn!(error = %e, "Binance trade-fee fetch failed, using defaults");
                return Ok(HashMap::new());
            }
        };

        let by_symbol: HashMap<String, f64> = raw
            .into_iter()
            .filter_map(|f| f.maker_commission.parse::<f64>().ok().map(|m| (f.symbol, m)))
            .collect();

        Ok(pairs
            .iter()
            .filter_map(|p| by_symbol.get(&p.symbol()).map(|m| (p.clone(), *m)))
            .collect())
    }

    async fn place_limit_order(
        &self,
        pair: &Pair,
        side: Side,
        qty: f64,
        price: f64,
    ) -> Result<OrderHandle, TradeError> {
        let raw: RawOrder = self
            .send_signed(
                reqwest::Method::POST,
                "/api/v3/order",
                vec![
                    ("symbol".into(), pair.symbol()),
                    ("side".into(), side.to_string()),
                    ("type".into(), "LIMIT".into()),
                    ("timeInForce".into(), "GTC".into()),
                    ("quantity".into(), format!("{qty:.8}")),
                    ("price".into(), format!("{price:.8}")),
                    ("newClientOrderId".into(), format!("arb-{}", uuid::Uuid::new_v4().simple())),
                    // RESULT responses always carry the executed quantities.
                    ("newOrderRespType".into(), "RESULT".into()),
                ],
            )
            .await?;
        debug!(pair = %pair, side = %side, qty, price, order_id = raw.order_id, "Limit order placed");
        Ok(OrderHandle { id: raw.order_id.to_string(), filled: 0.0, price: 0.0 })
    }

    async fn place_market_order(
        &self,
        pair: &Pair,
        side: Side,
        qty: f64,
    ) -> Result<OrderHandle, TradeError> {
        let raw: RawOrder = self
            .send_signed(
                reqwest::Method::POST,
                "/api/v3/order",
                vec![
                    ("symbol".into(), pair.symbol()),
                    ("side".into(), side.to_string()),
                    ("type".into(), "MARKET".into()),
                    ("quantity".into(), format!("{qty:.8}")),
                    ("newClientOrderId".into(), format!("arb-{}", uuid::Uuid::new_v4().simple())),
                    ("newOrderRespType".into(), "RESULT".into()),
                ],
            )
            .await?;
        let filled = parse_f64(&raw.executed_qty, "executedQty")?;
        let quote = parse_f64(&raw.cummulative_quote_qty, "cummulativeQuoteQty")?;
        let price = if filled > 0.0 { quote / filled } else { 0.0 };
        Ok(OrderHandle { id: raw.order_id.to_string(), filled, price })
    }

    async fn fetch_order(&self, id: &str, pair: &Pair) -> Result<OrderSnapshot, TradeError> {
        let raw: RawOrder = self
            .send_signed(
                reqwest::Method::GET,
                "/api/v3/order",
                vec![
                    ("symbol".into(), pair.symbol()),
                    ("orderId".into(), id.to_string()),
                ],
            )
            .await?;

        let status = map_status(&raw.status);
        let filled = parse_f64(&raw.executed_qty, "executedQty")?;
        let quote = parse_f64(&raw.cummulative_quote_qty, "cummulativeQuoteQty")?;
        let price = if filled > 0.0 { quote / filled } else { 0.0 };
        // Only fully filled orders are reconciled, so the extra trades
        // round-trip happens at most once per order.
        let fee = if status == OrderStatus::Closed {
            self.fetch_order_fee(id, pair).await.unwrap_or_else(|e| {
                warn!(pair = %pair, order_id = id, error = %e, "Fee lookup failed, assuming zero");
                0.0
            })
        } else {
            0.0
        };

        Ok(OrderSnapshot {
            id: raw.order_id.to_string(),
            status,
            side: map_side(&raw.side),
            filled,
            price,
            fee,
        })
    }

    async fn cancel_order(&self, id: &str, pair: &Pair) -> Result<(), TradeError> {
        let _: serde_json::Value = self
            .send_signed(
                reqwest::Method::DELETE,
                "/api/v3/order",
                vec![
                    ("symbol".into(), pair.symbol()),
                    ("orderId".into(), id.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    fn name(&self) -> &str {
        VENUE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
