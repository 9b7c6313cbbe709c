//! Event publishing port and its two adapters.
//!
//! The adapter is chosen exactly once at process startup from configuration
//! and injected into every component that publishes — there is no per-call
//! branching and no runtime discovery. `publish` never raises to the caller:
//! transport failures are caught, logged, and reported as
//! [`PublishOutcome::Degraded`], so task/reminder mutations always complete
//! even when messaging is down.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::BrokerConfig;

use super::Event;

/// Result of a publish attempt as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The broker gateway accepted the event.
    Acked,
    /// The event was not delivered to a broker (transport error, or the
    /// logging fallback is active). Callers treat this as success.
    Degraded,
}

/// Port for fire-and-forget event publication.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, event: &Event) -> PublishOutcome;
}

pub type SharedPublisher = Arc<dyn EventPublisher>;

// ─── Network adapter ──────────────────────────────────────────────────────────

/// Publishes to the broker's HTTP gateway with bounded connect/send timeouts.
/// At-least-once best effort: the gateway acks receipt, not consumption.
pub struct HttpPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPublisher {
    pub fn new(broker: &BrokerConfig, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(broker.connect_timeout_ms))
            .timeout(Duration::from_millis(broker.publish_timeout_ms))
            .build()
            .context("build broker gateway HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EventPublisher for HttpPublisher {
    async fn publish(&self, topic: &str, event: &Event) -> PublishOutcome {
        let url = format!("{}/v1/topics/{topic}/messages", self.base_url);
        match self.client.post(&url).json(event).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(
                    topic,
                    event_type = event.event_type.as_str(),
                    task_id = %event.task_id,
                    "event published"
                );
                PublishOutcome::Acked
            }
            Ok(resp) => {
                warn!(
                    topic,
                    event_type = event.event_type.as_str(),
                    status = %resp.status(),
                    "broker gateway rejected event — continuing degraded"
                );
                PublishOutcome::Degraded
            }
            Err(e) => {
                warn!(
                    topic,
                    event_type = event.event_type.as_str(),
                    err = %e,
                    "broker gateway unreachable — continuing degraded"
                );
                PublishOutcome::Degraded
            }
        }
    }
}

// ─── Fallback adapter ─────────────────────────────────────────────────────────

/// Records events to the log and returns immediately. Selected at startup
/// when no broker gateway is configured.
pub struct LogPublisher;

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, topic: &str, event: &Event) -> PublishOutcome {
        info!(
            topic,
            event_type = event.event_type.as_str(),
            task_id = %event.task_id,
            user_id = %event.user_id,
            payload = %event.payload,
            "event recorded (no broker configured)"
        );
        PublishOutcome::Degraded
    }
}

// ─── Startup selection ────────────────────────────────────────────────────────

/// Select the publisher implementation once, at process startup.
///
/// A configured gateway URL selects the network adapter; anything else — no
/// URL, or a client that cannot be constructed — selects the logging
/// fallback.
pub fn from_config(broker: &BrokerConfig) -> SharedPublisher {
    match broker.gateway_url.as_deref().filter(|u| !u.is_empty()) {
        Some(url) => match HttpPublisher::new(broker, url) {
            Ok(publisher) => {
                info!(gateway = url, "event publisher: broker gateway");
                Arc::new(publisher)
            }
            Err(e) => {
                warn!(err = %e, "broker gateway client failed to initialize — falling back to log publisher");
                Arc::new(LogPublisher)
            }
        },
        None => {
            info!("event publisher: logging fallback (no broker gateway configured)");
            Arc::new(LogPublisher)
        }
    }
}
