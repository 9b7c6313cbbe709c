//! Consumer-side access to the broker gateway.
//!
//! Polls are bounded in both directions: a capped batch size and a long-poll
//! wait that the request timeout always exceeds. Poll failures yield an empty
//! batch and a warning — a consumer loop never sees an error and never waits
//! unbounded.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use anyhow::{bail, Context as _, Result};
use serde::Deserialize;
use tracing::warn;

use crate::config::BrokerConfig;

use super::Event;

/// Headroom added to the long-poll wait when computing the request timeout.
const POLL_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default)]
    messages: Vec<serde_json::Value>,
}

/// A consumer-group subscription to one topic on the broker gateway.
pub struct EventConsumer {
    client: reqwest::Client,
    base_url: String,
    topic: String,
    group: String,
    poll_wait: Duration,
    poll_batch: usize,
}

impl EventConsumer {
    /// Build a consumer for `topic`. Fails when no gateway is configured —
    /// unlike publishing, consuming has no meaningful fallback.
    pub fn from_config(broker: &BrokerConfig, topic: &str) -> Result<Self> {
        let Some(base_url) = broker.gateway_url.as_deref().filter(|u| !u.is_empty()) else {
            bail!("broker gateway_url is not configured — consumer processes require a broker");
        };

        let poll_wait = Duration::from_millis(broker.poll_wait_ms);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(broker.connect_timeout_ms))
            .timeout(poll_wait + POLL_TIMEOUT_GRACE)
            .build()
            .context("build broker gateway HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            topic: topic.to_string(),
            group: broker.consumer_group.clone(),
            poll_wait,
            poll_batch: broker.poll_batch,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Fetch up to `poll_batch` events, waiting at most `poll_wait` for the
    /// first one. Transport or decode errors are logged and produce an empty
    /// batch; undecodable individual messages are skipped.
    pub async fn poll_batch(&self) -> Vec<Event> {
        let url = format!("{}/v1/topics/{}/poll", self.base_url, self.topic);
        let body = serde_json::json!({
            "group": self.group,
            "max_messages": self.poll_batch,
            "wait_ms": self.poll_wait.as_millis() as u64,
        });

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                warn!(topic = %self.topic, status = %resp.status(), "broker poll rejected");
                return Vec::new();
            }
            Err(e) => {
                warn!(topic = %self.topic, err = %e, "broker poll failed");
                return Vec::new();
            }
        };

        let parsed: PollResponse = match response.json().await {
            Ok(p) => p,
            Err(e) => {
                warn!(topic = %self.topic, err = %e, "broker poll response was not valid JSON");
                return Vec::new();
            }
        };

        parsed
            .messages
            .into_iter()
            .filter_map(|raw| match serde_json::from_value::<Event>(raw) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(topic = %self.topic, err = %e, "skipping undecodable event");
                    None
                }
            })
            .collect()
    }
}

// ─── Redelivery suppression ───────────────────────────────────────────────────

/// Bounded set of recently seen idempotency keys.
///
/// At-least-once delivery means consumers can receive the same event more
/// than once (broker redelivery, or the scanner republishing a still-unsent
/// reminder). The window remembers the last `capacity` keys and evicts
/// oldest-first.
pub struct DedupeWindow {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupeWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `key`; returns `true` when it was not already in the window.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.seen.contains(key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(key.to_string());
        self.seen.insert(key.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
