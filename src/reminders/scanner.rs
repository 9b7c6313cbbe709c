//! Due-reminder scanner background task.
//!
//! Runs inside `taskd serve`. Each tick fetches a bounded batch of unsent
//! reminders due now (earliest first) and publishes a `reminder_triggered`
//! event per reminder. It never marks reminders sent — that happens when the
//! notification dispatcher confirms delivery — so a reminder may be
//! republished on a later tick until it is confirmed. Consumers absorb the
//! resulting redelivery.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{HotConfig, RemindersConfig};
use crate::dispatch::WorkerCounters;
use crate::events::publisher::{PublishOutcome, SharedPublisher};
use crate::events::{Event, TOPIC_REMINDERS};
use crate::storage::Storage;

/// Publish events for every reminder currently due. Returns how many were
/// published.
pub async fn publish_due_reminders(
    storage: &Storage,
    publisher: &SharedPublisher,
    counters: &WorkerCounters,
    batch: usize,
) -> Result<usize> {
    let due = storage
        .due_reminders_with_owner(Utc::now(), batch as i64)
        .await?;

    if due.is_empty() {
        return Ok(0);
    }

    let count = due.len();
    for reminder in due {
        let event = Event::reminder_triggered(
            &reminder.task_id,
            &reminder.user_id,
            &reminder.id,
            &reminder.remind_at,
            "due",
        );
        match publisher.publish(TOPIC_REMINDERS, &event).await {
            PublishOutcome::Acked => counters.inc_processed(),
            PublishOutcome::Degraded => counters.inc_degraded(),
        }
    }

    info!(published = count, "reminder scanner published due reminders");
    Ok(count)
}

/// Background scanner loop — runs perpetually until the process stops.
///
/// The interval is re-read from hot config every tick so `config.toml`
/// changes apply without a restart. Call this in a `tokio::spawn` during
/// startup.
pub async fn run_reminder_scanner(
    storage: Arc<Storage>,
    publisher: SharedPublisher,
    counters: Arc<WorkerCounters>,
    config: RemindersConfig,
    hot: Option<Arc<RwLock<HotConfig>>>,
) {
    info!(
        interval_secs = config.scan_interval_secs,
        batch = config.scan_batch,
        "reminder scanner started"
    );

    loop {
        let interval_secs = match &hot {
            Some(hot) => hot.read().await.scan_interval_secs,
            None => config.scan_interval_secs,
        };
        tokio::time::sleep(std::time::Duration::from_secs(interval_secs.max(1))).await;

        match publish_due_reminders(&storage, &publisher, &counters, config.scan_batch).await {
            Ok(_) => {}
            Err(e) => warn!(err = %e, "reminder scanner tick failed"),
        }
    }
}
