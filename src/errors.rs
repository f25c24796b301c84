//! Error taxonomy for the trading core.
//!
//! Venue clients and the oracle map their failures into these classes so
//! the engine can decide between retry-next-cycle, skip, and hard halt
//! without inspecting error strings.

use thiserror::Error;

/// Typed failure classes the cycle engine distinguishes.
#[derive(Debug, Error)]
pub enum TradeError {
    /// Network, rate-limit, or 5xx from a venue — the step did not happen,
    /// the pair is retried next cycle.
    #[error("transient venue error: {0}")]
    Transient(String),

    /// Logic guard on a debit or order placement. Never retried; the
    /// action is skipped.
    #[error("insufficient balance: need {needed:.2}, have {available:.2}")]
    InsufficientBalance { needed: f64, available: f64 },

    /// Feature window or order book unusable for this cycle.
    #[error("stale data: {0}")]
    StaleData(String),

    /// Global drawdown gate tripped — non-recoverable within the session.
    #[error("risk gate halt: {0}")]
    RiskHalt(String),
}

impl TradeError {
    /// Whether this error class may succeed if the same step is retried
    /// on a later cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, TradeError::Transient(_) | TradeError::StaleData(_))
    }

    /// Whether this error must stop the orchestrator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TradeError::RiskHalt(_))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
