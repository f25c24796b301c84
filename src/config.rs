//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use crate::types::Pair;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub venues: VenuesConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub oracle: OracleConfig,
    pub alerts: AlertsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub cycle_interval_secs: u64,
    /// Stop after this many cycles; `None` runs until a shutdown signal.
    #[serde(default)]
    pub max_cycles: Option<u64>,
    pub state_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenuesConfig {
    pub primary: VenueConfig,
    pub secondary: VenueConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VenueConfig {
    /// "binance" or "bingx".
    pub kind: String,
    pub api_key_env: String,
    pub api_secret_env: String,
    #[serde(default)]
    pub testnet: bool,
    /// Quote currency seeded per pair at a fresh start. `None` derives the
    /// split from a live balance fetch.
    #[serde(default)]
    pub initial_quote_per_pair: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StrategyConfig {
    pub pairs: Vec<Pair>,
    /// Fixed margin added on top of both venues' maker fees to form the
    /// minimum actionable spread.
    pub spread_safety_margin: f64,
    /// Probability above which a pair is eligible regardless of spread.
    pub prediction_threshold: f64,
    /// Probability below which a non-flat position is partially exited.
    pub exit_threshold: f64,
    /// Fraction of available quote committed to a signal entry.
    pub trade_fraction: f64,
    /// Order-book levels walked when quoting a price.
    pub depth_levels: usize,
    pub base_price_adjustment: f64,
    pub base_max_position_size: f64,
    /// Candles fetched for the oracle feature window.
    pub lookback: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    /// Fraction of initial capital; drawdown past this halts the session.
    pub max_drawdown: f64,
    pub base_daily_loss_limit: f64,
    pub volatility_threshold: f64,
    /// Open-order cap per pair per cycle.
    pub max_open_orders: usize,
    /// Hard cap on concurrently traded pairs.
    pub max_concurrent_pairs: usize,
    pub min_order_notional: f64,
    /// Residuals below this notional are left as dust at liquidation.
    pub min_sell_notional: f64,
    pub fixed_stop_loss: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OracleConfig {
    /// Base URL of the model-serving sidecar.
    pub endpoint: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertsConfig {
    pub telegram_bot_token_env: Option<String>,
    pub telegram_chat_id_env: Option<String>,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    fn validate(&self) -> Result<()> {
        if self.strategy.pairs.is_empty() {
            anyhow::bail!("strategy.pairs must not be empty");
        }
        if !(0.0..1.0).contains(&self.risk.max_drawdown) {
            anyhow::bail!("risk.max_drawdown must be in [0, 1)");
        }
        if self.risk.max_concurrent_pairs == 0 {
            anyhow::bail!("risk.max_concurrent_pairs must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.strategy.prediction_threshold) {
            anyhow::bail!("strategy.prediction_threshold must be in [0, 1]");
        }
        Ok(())
    }
}
