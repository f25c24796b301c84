//! ARBITER — Cross-exchange spot trading cycle engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the session snapshot from disk (or derives a fresh capital
//! split from live balances), and runs the scan→gate→allocate→trade
//! cycle loop with graceful shutdown.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use arbiter::config::{self, VenueConfig};
use arbiter::engine::ledger::PairLedger;
use arbiter::engine::orchestrator::Engine;
use arbiter::notify::Notifier;
use arbiter::oracle::http::HttpForecaster;
use arbiter::oracle::Forecaster;
use arbiter::storage::{self, Snapshot};
use arbiter::types::{FeeTable, Pair};
use arbiter::venues::binance::BinanceVenue;
use arbiter::venues::bingx::BingxVenue;
use arbiter::venues::SpotVenue;

const BANNER: &str = r#"
    _    ____  ____ ___ _____ _____ ____
   / \  |  _ \| __ )_ _|_   _| ____|  _ \
  / _ \ | |_) |  _ \| |  | | |  _| | |_) |
 / ___ \|  _ <| |_) | |  | | | |___|  _ <
/_/   \_\_| \_\____/___| |_| |_____|_| \_\

  Adaptive Risk-Bounded Iterative Trading EngineeR
  v0.1.0 — Spot Cycle Engine
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = config::AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        cycle_interval_secs = cfg.agent.cycle_interval_secs,
        max_cycles = ?cfg.agent.max_cycles,
        pairs = cfg.strategy.pairs.len(),
        "ARBITER starting up"
    );

    // -- Venues ------------------------------------------------------------

    let venue_a = build_venue(&cfg.venues.primary)?;
    let venue_b = build_venue(&cfg.venues.secondary)?;

    // Maker fees, fetched once; missing pairs fall back to the default.
    let mut fees = FeeTable::new();
    for venue in [&venue_a, &venue_b] {
        match venue.fetch_fees(&cfg.strategy.pairs).await {
            Ok(schedule) => {
                for (pair, maker) in schedule {
                    fees.insert(venue.name(), pair, maker);
                }
            }
            Err(e) => {
                warn!(venue = venue.name(), error = %e, "Fee fetch failed, using defaults");
            }
        }
    }

    // -- Oracle ------------------------------------------------------------

    let forecaster = HttpForecaster::new(
        &cfg.oracle.endpoint,
        Duration::from_secs(cfg.oracle.request_timeout_secs),
    )?;
    // The oracle being unreachable at startup is an unrecoverable
    // configuration error; mid-session failures only skip pairs.
    forecaster
        .health_check()
        .await
        .context("Oracle sidecar failed the startup health check")?;
    let oracle: Arc<dyn Forecaster> = Arc::new(forecaster);

    // -- Notifications -------------------------------------------------------

    let bot_token = cfg
        .alerts
        .telegram_bot_token_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok())
        .map(SecretString::from);
    let chat_id = cfg
        .alerts
        .telegram_chat_id_env
        .as_deref()
        .and_then(|env| std::env::var(env).ok());
    let notifier = Notifier::from_credentials(bot_token, chat_id)?;

    // -- Session state -------------------------------------------------------

    let snapshot = match storage::load_snapshot(cfg.agent.state_file.as_deref())? {
        Some(s) => {
            info!(
                pairs = s.ledgers.len(),
                initial_capital = s.initial_capital,
                "Resumed from saved snapshot"
            );
            s
        }
        None => {
            let s = fresh_snapshot(&cfg, &venue_a, &venue_b).await?;
            info!(initial_capital = s.initial_capital, "Fresh start");
            s
        }
    };

    // -- Run -----------------------------------------------------------------

    let mut engine = Engine::new(&cfg, venue_a, venue_b, oracle, fees, notifier, snapshot);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl+C received, requesting shutdown");
            let _ = shutdown_tx.send(true);
        }
    });

    info!(
        interval_secs = cfg.agent.cycle_interval_secs,
        "Entering main loop. Press Ctrl+C to stop."
    );

    let report = engine
        .run(
            Duration::from_secs(cfg.agent.cycle_interval_secs),
            cfg.agent.max_cycles,
            shutdown_rx,
        )
        .await;

    info!(
        cycles = report.cycles,
        pnl = format!("{:+.2}", report.pnl()),
        fees = format!("{:.2}", report.total_fees),
        "ARBITER shut down cleanly."
    );

    Ok(())
}

/// Construct a venue client from its config block.
fn build_venue(cfg: &VenueConfig) -> Result<Arc<dyn SpotVenue>> {
    let api_key = config::AppConfig::resolve_env(&cfg.api_key_env)?;
    let api_secret = SecretString::from(config::AppConfig::resolve_env(&cfg.api_secret_env)?);

    match cfg.kind.as_str() {
        "binance" => Ok(Arc::new(BinanceVenue::new(api_key, api_secret, cfg.testnet)?)),
        "bingx" => Ok(Arc::new(BingxVenue::new(api_key, api_secret)?)),
        other => anyhow::bail!("Unknown venue kind: {other}"),
    }
}

/// Build the initial capital split for a fresh session: the configured
/// per-pair seed, or a live balance fetch divided evenly across pairs.
async fn fresh_snapshot(
    cfg: &config::AppConfig,
    venue_a: &Arc<dyn SpotVenue>,
    venue_b: &Arc<dyn SpotVenue>,
) -> Result<Snapshot> {
    let pairs = &cfg.strategy.pairs;
    let split_a = venue_split(&cfg.venues.primary, venue_a, pairs).await?;
    let split_b = venue_split(&cfg.venues.secondary, venue_b, pairs).await?;

    let mut ledgers = HashMap::new();
    let mut initial_capital = 0.0;
    for pair in pairs {
        let quote_a = split_a.get(pair).copied().unwrap_or(0.0);
        let quote_b = split_b.get(pair).copied().unwrap_or(0.0);
        initial_capital += quote_a + quote_b;
        ledgers.insert(
            pair.clone(),
            PairLedger::new(
                pair.clone(),
                &[
                    (venue_a.name().to_string(), quote_a),
                    (venue_b.name().to_string(), quote_b),
                ],
            ),
        );
    }

    Ok(Snapshot { ledgers, initial_capital })
}

/// Per-pair quote seed on one venue.
async fn venue_split(
    venue_cfg: &VenueConfig,
    venue: &Arc<dyn SpotVenue>,
    pairs: &[Pair],
) -> Result<HashMap<Pair, f64>> {
    if let Some(seed) = venue_cfg.initial_quote_per_pair {
        return Ok(pairs.iter().map(|p| (p.clone(), seed)).collect());
    }

    // No configured seed: split the live free balance of each quote
    // asset evenly across the pairs that use it.
    let sheet = venue
        .fetch_balance()
        .await
        .with_context(|| format!("Balance fetch failed on {}", venue.name()))?;

    let mut per_asset: HashMap<&str, usize> = HashMap::new();
    for pair in pairs {
        *per_asset.entry(pair.quote.as_str()).or_insert(0) += 1;
    }

    Ok(pairs
        .iter()
        .map(|pair| {
            let free = sheet.get(&pair.quote).map(|b| b.free).unwrap_or(0.0);
            let n = per_asset[pair.quote.as_str()] as f64;
            (pair.clone(), free / n)
        })
        .collect())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("arbiter=info"));

    let json_logging = std::env::var("ARBITER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
