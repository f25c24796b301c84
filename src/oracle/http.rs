//! HTTP client for the model-serving sidecar.
//!
//! The sidecar hosts the trained prediction and loss models behind two
//! JSON endpoints. Responses are clamped into their documented ranges so
//! a misbehaving model can never push the risk gate out of bounds.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use super::Forecaster;
use crate::data::FeatureWindow;

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    #[serde(flatten)]
    window: &'a FeatureWindow,
}

#[derive(Debug, Serialize)]
struct LossRequest<'a> {
    #[serde(flatten)]
    window: &'a FeatureWindow,
    recent_losses: &'a [f64],
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    probability: f64,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LossResponse {
    forecasted_loss: f64,
}

/// `Forecaster` backed by the sidecar's `/predict` and `/forecast-loss`
/// endpoints.
pub struct HttpForecaster {
    client: Client,
    base_url: String,
    model_name: String,
}

impl HttpForecaster {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build oracle HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_name: "sidecar".to_string(),
        })
    }

    /// Probe the sidecar once. Called at session start — the oracle being
    /// unreachable at startup is an unrecoverable configuration error.
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("Oracle sidecar unreachable")?;
        if !resp.status().is_success() {
            anyhow::bail!("Oracle sidecar unhealthy: HTTP {}", resp.status());
        }
        Ok(())
    }
}

#[async_trait]
impl Forecaster for HttpForecaster {
    async fn predict(&self, window: &FeatureWindow) -> Result<f64> {
        let url = format!("{}/predict", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&PredictRequest { window })
            .send()
            .await
            .context("Oracle predict request failed")?
            .error_for_status()
            .context("Oracle predict returned error status")?;

        let body: PredictResponse =
            resp.json().await.context("Oracle predict response unparsable")?;

        if let Some(version) = &body.model_version {
            debug!(pair = %window.pair, version = %version, prob = body.probability, "Oracle prediction");
        }

        if !(0.0..=1.0).contains(&body.probability) {
            warn!(
                pair = %window.pair,
                probability = body.probability,
                "Oracle probability out of range, clamping"
            );
        }
        Ok(body.probability.clamp(0.0, 1.0))
    }

    async fn forecast_loss(
        &self,
        window: &FeatureWindow,
        recent_losses: &[f64],
    ) -> Result<f64> {
        let url = format!("{}/forecast-loss", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&LossRequest { window, recent_losses })
            .send()
            .await
            .context("Oracle loss-forecast request failed")?
            .error_for_status()
            .context("Oracle loss-forecast returned error status")?;

        let body: LossResponse =
            resp.json().await.context("Oracle loss-forecast response unparsable")?;

        // A loss forecast is a magnitude; negative model output means "none".
        Ok(body.forecasted_loss.max(0.0))
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
