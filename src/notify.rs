//! Best-effort notification channel.
//!
//! Alerts are pushed into a bounded queue and delivered by a background
//! task, decoupled from the trading control flow: a slow or failing
//! Telegram API can never stall a cycle. Overflow and delivery errors
//! are logged and dropped — notifications are observability, not state.

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Queued alerts before backpressure drops new ones.
const QUEUE_CAPACITY: usize = 64;

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Delivery backend for alert text.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, text: &str) -> Result<()>;
}

/// Telegram bot delivery.
pub struct TelegramSink {
    client: Client,
    bot_token: SecretString,
    chat_id: String,
}

impl TelegramSink {
    pub fn new(bot_token: SecretString, chat_id: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, bot_token, chat_id })
    }
}

#[async_trait]
impl AlertSink for TelegramSink {
    async fn deliver(&self, text: &str) -> Result<()> {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.bot_token.expose_secret()
        );
        let resp = self
            .client
            .post(&url)
            .form(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("Telegram returned HTTP {}", resp.status());
        }
        Ok(())
    }
}

/// Fallback sink when Telegram is not configured: alerts go to the log.
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn deliver(&self, text: &str) -> Result<()> {
        info!(alert = text, "Notification");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Handle for enqueueing alerts. Cheap to clone; all clones share the
/// same queue and background worker.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<String>,
}

impl Notifier {
    /// Spawn the delivery worker over the given sink.
    pub fn with_sink(sink: Arc<dyn AlertSink>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<String>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                if let Err(e) = sink.deliver(&text).await {
                    warn!(error = %e, "Notification delivery failed");
                }
            }
            debug!("Notification worker stopped");
        });
        Self { tx }
    }

    /// Telegram-backed notifier, or log-only when credentials are absent.
    pub fn from_credentials(
        bot_token: Option<SecretString>,
        chat_id: Option<String>,
    ) -> Result<Self> {
        match (bot_token, chat_id) {
            (Some(token), Some(chat)) => {
                let sink = TelegramSink::new(token, chat)?;
                Ok(Self::with_sink(Arc::new(sink), QUEUE_CAPACITY))
            }
            _ => {
                info!("Telegram not configured, notifications go to the log only");
                Ok(Self::with_sink(Arc::new(LogSink), QUEUE_CAPACITY))
            }
        }
    }

    /// Enqueue an alert. Never blocks and never fails the caller: a full
    /// queue drops the alert with a warning.
    pub fn send(&self, text: impl Into<String>) {
        let text = text.into();
        if let Err(e) = self.tx.try_send(text) {
            warn!(error = %e, "Notification queue full or closed, alert dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
