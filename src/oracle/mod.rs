//! Predictive oracle integration.
//!
//! Defines the `Forecaster` trait and an HTTP implementation talking to
//! the model-serving sidecar. The engine only ever sees probabilities and
//! loss forecasts; model internals live entirely on the other side of
//! this boundary.

pub mod http;

use anyhow::Result;
use async_trait::async_trait;

use crate::data::FeatureWindow;

/// Abstraction over the predictive scoring oracle.
///
/// `predict` returns a probability-like score in [0, 1] for the pair's
/// near-term upside; `forecast_loss` estimates the quote-currency loss the
/// adaptive daily-loss limit should brace for.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Forecaster: Send + Sync {
    /// Probability of an upward move over the feature window's horizon.
    async fn predict(&self, window: &FeatureWindow) -> Result<f64>;

    /// Forecasted daily loss in quote currency, given recent realized
    /// losses. Implementations return 0.0 when history is too thin.
    async fn forecast_loss(
        &self,
        window: &FeatureWindow,
        recent_losses: &[f64],
    ) -> Result<f64>;

    /// Model identifier string for logging.
    fn name(&self) -> &str;
}
