//! Persistence layer.
//!
//! Saves and loads the session snapshot — per-pair ledgers and the
//! initial capital baseline — to a JSON file. Loaded at startup when
//! present so a restart resumes with consistent balances instead of
//! re-deriving them from a live fetch.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use crate::engine::ledger::PairLedger;
use crate::types::Pair;

/// Default state file path.
const DEFAULT_STATE_FILE: &str = "arbiter_state.json";

/// Everything a restart needs to resume the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub ledgers: HashMap<Pair, PairLedger>,
    pub initial_capital: f64,
}

/// Save the session snapshot to a JSON file.
pub fn save_snapshot(snapshot: &Snapshot, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json = serde_json::to_string_pretty(snapshot)
        .context("Failed to serialise session snapshot")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write snapshot to {path}"))?;

    debug!(path, pairs = snapshot.ledgers.len(), "Snapshot saved");
    Ok(())
}

/// Load the session snapshot from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_snapshot(path: Option<&str>) -> Result<Option<Snapshot>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved snapshot found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read snapshot from {path}"))?;

    let snapshot: Snapshot = serde_json::from_str(&json)
        .context(format!("Failed to parse snapshot from {path}"))?;

    info!(
        path,
        pairs = snapshot.ledgers.len(),
        initial_capital = snapshot.initial_capital,
        "Snapshot loaded from disk"
    );

    Ok(Some(snapshot))
}

/// Delete the snapshot file (for testing or reset).
pub fn delete_snapshot(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path)
            .context(format!("Failed to delete snapshot file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
