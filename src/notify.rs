//! Notifications
//!
//! Fire-and-forget messages at notable loop events. A notifier never returns
//! an error; delivery failures are logged and swallowed. Webhook delivery runs
//! on its own task so a slow endpoint never holds up the loop.

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::types::Tier;

#[derive(Debug, Clone, PartialEq)]
pub enum NotifyEvent {
    CostLimit {
        reason: String,
        daily_total: f64,
        monthly_total: f64,
    },
    ConsecutiveFailures {
        count: u32,
        last_error: String,
    },
    TierSwitch {
        from: Tier,
        to: Tier,
        reason: String,
    },
    SessionComplete {
        session_id: String,
        reason: String,
        generated: u64,
        failed: u64,
        primary_count: u64,
        fallback_count: u64,
        session_cost: f64,
    },
}

impl NotifyEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NotifyEvent::CostLimit { .. } => "cost_limit",
            NotifyEvent::ConsecutiveFailures { .. } => "consecutive_failures",
            NotifyEvent::TierSwitch { .. } => "tier_switch",
            NotifyEvent::SessionComplete { .. } => "session_complete",
        }
    }

    pub fn message(&self) -> String {
        match self {
            NotifyEvent::CostLimit {
                reason,
                daily_total,
                monthly_total,
            } => format!(
                "Cost limit reached: {}\ntoday ${:.2}, this month ${:.2}",
                reason, daily_total, monthly_total
            ),
            NotifyEvent::ConsecutiveFailures { count, last_error } => {
                let last: String = last_error.chars().take(100).collect();
                format!("{} consecutive failures, last: {}", count, last)
            }
            NotifyEvent::TierSwitch { from, to, reason } => {
                format!("Tier switch {} -> {} ({})", from, to, reason)
            }
            NotifyEvent::SessionComplete {
                session_id,
                reason,
                generated,
                failed,
                primary_count,
                fallback_count,
                session_cost,
            } => format!(
                "Session {} ended ({})\n{} generated, {} failed; primary {} + fallback {} = ${:.2}",
                session_id, reason, generated, failed, primary_count, fallback_count, session_cost
            ),
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: &NotifyEvent);

    /// Wait for deliveries still in flight.
    async fn flush(&self) {}
}

/// Logs events and does nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &NotifyEvent) {
        info!(event = event.kind(), message = %event.message(), "notification");
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Chat webhook; unset means log-only.
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Posts `{"text": ...}` to a chat webhook with exponential backoff.
pub struct WebhookNotifier {
    delivery: Arc<WebhookDelivery>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

struct WebhookDelivery {
    client: Client,
    url: String,
    retries: u32,
    backoff: Duration,
}

impl WebhookDelivery {
    async fn post(&self, text: &str) -> Result<(), reqwest::Error> {
        self.client
            .post(&self.url)
            .json(&json!({ "text": text }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn deliver(&self, kind: &'static str, text: String) {
        for attempt in 0..=self.retries {
            match self.post(&text).await {
                Ok(()) => {
                    info!(event = kind, "notification delivered");
                    return;
                }
                Err(e) if attempt < self.retries => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt);
                    warn!(event = kind, attempt, error = %e, "notification failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(
                        event = kind,
                        attempts = self.retries + 1,
                        error = %e,
                        "notification dropped"
                    );
                }
            }
        }
    }
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, config: &NotifyConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            delivery: Arc::new(WebhookDelivery {
                client,
                url: url.into(),
                retries: config.retries,
                backoff: Duration::from_millis(config.backoff_ms),
            }),
            in_flight: Mutex::new(Vec::new()),
        })
    }

    /// Deliveries spawned and not yet finished.
    pub fn pending(&self) -> usize {
        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|handle| !handle.is_finished());
        in_flight.len()
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &NotifyEvent) {
        let delivery = self.delivery.clone();
        let kind = event.kind();
        let text = event.message();
        let handle = tokio::spawn(async move { delivery.deliver(kind, text).await });

        let mut in_flight = self.in_flight.lock();
        in_flight.retain(|handle| !handle.is_finished());
        in_flight.push(handle);
    }

    async fn flush(&self) {
        let handles = std::mem::take(&mut *self.in_flight.lock());
        if !handles.is_empty() {
            debug!(pending = handles.len(), "waiting for notifications");
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "notification task failed");
            }
        }
    }
}

/// Build the notifier for `config`: webhook when a URL is set, log otherwise.
pub fn from_config(config: &NotifyConfig) -> Result<Arc<dyn Notifier>, reqwest::Error> {
    match &config.webhook_url {
        Some(url) if !url.trim().is_empty() => Ok(Arc::new(WebhookNotifier::new(url, config)?)),
        _ => Ok(Arc::new(LogNotifier)),
    }
}
