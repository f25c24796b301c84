//! BingX spot REST client.
//!
//! API docs: https://bingx-api.github.io/docs/#/en-us/spot/
//! Base URL: https://open-api.bingx.com
//! Auth: `X-BX-APIKEY` header; HMAC-SHA256 signature over the query string.
//! All responses are wrapped in `{code, msg, data}`; a non-zero code is an
//! application-level failure.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::{hmac_sha256_hex, SpotVenue};
use crate::data::Candle;
use crate::errors::TradeError;
use crate::types::{
    AssetBalance, BalanceSheet, BookLevel, OrderBook, OrderHandle, OrderSnapshot, OrderStatus,
    Pair, Side, Ticker,
};

const BASE_URL: &str = "https://open-api.bingx.com";
const VENUE_NAME: &str = "bingx";
const KLINE_INTERVAL: &str = "5m";

/// BingX symbols use a dash separator: `ETH-USDT`.
fn bingx_symbol(pair: &Pair) -> String {
    format!("{}-{}", pair.base, pair.quote)
}

fn map_status(status: &str) -> OrderStatus {
    match status {
        "NEW" | "PENDING" | "PARTIALLY_FILLED" => OrderStatus::Open,
        "FILLED" => OrderStatus::Closed,
        _ => OrderStatus::Canceled, // CANCELED, FAILED
    }
}

// ---------------------------------------------------------------------------
// API response types (BingX JSON → Rust)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    msg: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBookTicker {
    bid_price: f64,
    ask_price: f64,
}

#[derive(Debug, Deserialize)]
struct RawDepth {
    bids: Vec<(String, String)>,
    asks: Vec<(String, String)>,
}

#[derive(Debug, Deserialize)]
struct RawBalances {
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
    #[serde(default)]
    fee: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommission {
    maker_commission_rate: f64,
}

fn parse_f64(s: &str, what: &str) -> Result<f64, TradeError> {
    s.parse::<f64>()
        .map_err(|_| TradeError::Transient(format!("bingx: unparsable {what}: {s}")))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct BingxVenue {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: SecretString,
}

impl BingxVenue {
    pub fn new(api_key: String, api_secret: SecretString) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            base_url: BASE_URL.to_string(),
            api_key,
            api_secret,
        })
    }

    fn transient(e: impl std::fmt::Display, op: &str) -> TradeError {
        TradeError::Transient(format!("bingx {op}: {e}"))
    }

    /// All BingX endpoints, public included, accept a signed query.
    async fn send<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<T, TradeError> {
        params.push(("timestamp".into(), Utc::now().timestamp_millis().to_string()));
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
            .header("X-BX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| Self::transient(e, path))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::transient(status, path));
        }

        let envelope: Envelope<T> =
            resp.json().await.map_err(|e| Self::transient(e, path))?;
        if envelope.code != 0 {
            return Err(Self::transient(
                format!("code {}: {}", envelope.code, envelope.msg),
                path,
            ));
        }
        envelope
            .data
            .ok_or_else(|| Self::transient("empty data", path))
    }
}

#[async_trait]
impl SpotVenue for BingxVenue {
    async fn fetch_ticker(&self, pair: &Pair) -> Result<Ticker, TradeError> {
        // The book-ticker endpoint returns a single-element list.
        let raw: Vec<RawBookTicker> = self
            .send(
                reqwest::Method::GET,
                "/openApi/spot/v1/ticker/bookTicker",
                vec![("symbol".into(), bingx_symbol(pair))],
            )
            .await?;
        let first = raw
            .first()
            .ok_or_else(|| Self::transient("empty ticker", "bookTicker"))?;
        Ok(Ticker { bid: first.bid_price, ask: first.ask_price })
    }

    async fn fetch_order_book(&self, pair: &Pair, depth: usize)
        -> Result<OrderBook, TradeError>
    {
        let raw: RawDepth = self
            .send(
                reqwest::Method::GET,
                "/openApi/spot/v1/market/depth",
                vec![
                    ("symbol".into(), bingx_symbol(pair)),
                    ("limit".into(), depth.clamp(1, 100).to_string()),
                ],
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
        let raw: Vec<Vec<serde_json::Value>> = self
            .send(
                reqwest::Method::GET,
                "/openApi/spot/v2/market/kline",
                vec![
                    ("symbol".into(), bingx_symbol(pair)),
                    ("interval".into(), KLINE_INTERVAL.into()),
                    ("limit".into(), limit.clamp(1, 1000).to_string()),
                ],
            )
            .await?;

        let field = |row: &[serde_json::Value], idx: usize| -> Result<f64, TradeError> {
            row.get(idx)
                .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
                .ok_or_else(|| TradeError::Transient(format!("bingx: bad kline field {idx}")))
        };

        let mut candles = Vec::with_capacity(raw.len());
        for row in &raw {
            candles.push(Candle {
                ts: row.first().and_then(|v| v.as_i64()).unwrap_or_default(),
                open: field(row, 1)?,
                high: field(row, 2)?,
                low: field(row, 3)?,
                close: field(row, 4)?,
                volume: field(row, 5)?,
            });
        }
        // BingX returns newest first; the engine expects oldest first.
        candles.reverse();
        Ok(candles)
    }

    async fn fetch_balance(&self) -> Result<BalanceSheet, TradeError> {
        let raw: RawBalances = self
            .send(
                reqwest::Method::GET,
                "/openApi/spot/v1/account/balance",
                Vec::new(),
            )
            .await?;
        let mut sheet = BalanceSheet::new();
        for b in raw.balances {
            let free = parse_f64(&b.free, "free")?;
            let locked = parse_f64(&b.locked, "locked")?;
            if free > 0.0 || locked > 0.0 {
                sheet.insert(b.asset, AssetBalance { free, locked });
            }
        }
        Ok(sheet)
    }

    async fn fetch_fees(&self, pairs: &[Pair]) -> Result<HashMap<Pair, f64>, TradeError> {
        let mut fees = HashMap::new();
        for pair in pairs {
            let raw: Result<RawCommission, _> = self
                .send(
                    reqwest::Method::GET,
                    "/openApi/spot/v1/user/commissionRate",
                    vec![("symbol".into(), bingx_symbol(pair))],
                )
                .await;
            match raw {
                Ok(c) => {
                    fees.insert(pair.clone(), c.maker_commission_rate);
                }
                Err(e) => {
                    debug!(pair = %pair, error = %e, "BingX fee fetch failed, using default");
                }
            }
        }
        Ok(fees)
    }

    async fn place_limit_order(
        &self,
        pair: &Pair,
        side: Side,
        qty: f64,
        price: f64,
    ) -> Result<OrderHandle, TradeError> {
        let raw: RawOrder = self
            .send(
                reqwest::Method::POST,
                "/openApi/spot/v1/trade/order",
                vec![
                    ("symbol".into(), bingx_symbol(pair)),
                    ("side".into(), side.to_string()),
                    ("type".into(), "LIMIT".into()),
                    ("quantity".into(), format!("{qty:.8}")),
                    ("price".into(), format!("{price:.8}")),
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
            .send(
                reqwest::Method::POST,
                "/openApi/spot/v1/trade/order",
                vec![
                    ("symbol".into(), bingx_symbol(pair)),
                    ("side".into(), side.to_string()),
                    ("type".into(), "MARKET".into()),
                    ("quantity".into(), format!("{qty:.8}")),
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
            .send(
                reqwest::Method::GET,
                "/openApi/spot/v1/trade/query",
                vec![
                    ("symbol".into(), bingx_symbol(pair)),
                    ("orderId".into(), id.to_string()),
                ],
            )
            .await?;
        let filled = parse_f64(&raw.executed_qty, "executedQty")?;
        let quote = parse_f64(&raw.cummulative_quote_qty, "cummulativeQuoteQty")?;
        Ok(OrderSnapshot {
            id: raw.order_id.to_string(),
            status: map_status(&raw.status),
            side: if raw.side.eq_ignore_ascii_case("buy") { Side::Buy } else { Side::Sell },
            filled,
            price: if filled > 0.0 { quote / filled } else { 0.0 },
            fee: raw.fee.abs(),
        })
    }

    async fn cancel_order(&self, id: &str, pair: &Pair) -> Result<(), TradeError> {
        let _: serde_json::Value = self
            .send(
                reqwest::Method::POST,
                "/openApi/spot/v1/trade/cancel",
                vec![
                    ("symbol".into(), bingx_symbol(pair)),
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
