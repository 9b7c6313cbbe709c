//! Notification dispatcher — the `taskd notifier` process.
//!
//! Consumes `reminder_triggered` events from the "reminders" topic, performs
//! a stubbed delivery (a real deployment would route to email/push/SMS), and
//! confirms delivery by marking the reminder sent. Failed deliveries are
//! counted and dropped — there is no automatic retry; the scanner republishes
//! unconfirmed reminders on its next tick.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use tracing::{info, warn};

use crate::events::consumer::{DedupeWindow, EventConsumer};
use crate::events::{Event, EventType, TOPIC_REMINDERS};
use crate::reminders::ReminderScheduler;

use super::SharedCounters;

/// How many idempotency keys the redelivery window remembers.
const DEDUPE_CAPACITY: usize = 4096;

/// Stubbed delivery action. Returns whether the notification went out.
///
/// The reminder channel (email, push, SMS) is an external collaborator; here
/// delivery is a structured log line. An envelope without a reminder id
/// cannot be confirmed and counts as failed.
async fn deliver_reminder(event: &Event) -> bool {
    let Some(reminder_id) = event.payload.get("reminder_id").and_then(|v| v.as_str()) else {
        warn!(task_id = %event.task_id, "reminder event missing reminder_id — cannot deliver");
        return false;
    };
    let reminder_time = event
        .payload
        .get("reminder_time")
        .and_then(|v| v.as_str())
        .unwrap_or("");

    info!(
        reminder_id,
        task_id = %event.task_id,
        user_id = %event.user_id,
        reminder_time,
        "delivering reminder notification"
    );
    true
}

/// Run the dispatcher loop until the process is stopped.
pub async fn run_notifier(
    consumer: EventConsumer,
    scheduler: Arc<ReminderScheduler>,
    counters: SharedCounters,
) -> Result<()> {
    info!(topic = consumer.topic(), "notification dispatcher started");
    let mut dedupe = DedupeWindow::new(DEDUPE_CAPACITY);

    loop {
        // The poll itself is bounded (wait + batch cap); an empty batch just
        // loops into the next poll.
        let batch = consumer.poll_batch().await;
        for event in batch {
            handle_event(event, &scheduler, &counters, &mut dedupe).await;
        }
    }
}

async fn handle_event(
    event: Event,
    scheduler: &ReminderScheduler,
    counters: &SharedCounters,
    dedupe: &mut DedupeWindow,
) {
    if event.event_type != EventType::ReminderTriggered {
        counters.inc_ignored();
        return;
    }
    // "scheduled" and "sent" stages are bookkeeping, not deliveries.
    let stage = event.payload.get("stage").and_then(|v| v.as_str());
    if stage != Some("due") {
        counters.inc_ignored();
        return;
    }

    if !dedupe.insert(&event.idempotency_key()) {
        counters.inc_deduped();
        return;
    }

    if !deliver_reminder(&event).await {
        counters.inc_failed();
        return;
    }
    counters.inc_processed();

    // Confirm delivery so the scanner stops republishing this reminder.
    // mark_sent is idempotent, so a race with another dispatcher is harmless.
    if let Some(reminder_id) = event.payload.get("reminder_id").and_then(|v| v.as_str()) {
        if let Err(e) = scheduler.mark_sent(reminder_id).await {
            warn!(reminder_id, err = %e, "failed to mark reminder sent");
        }
    }
}

/// Build the consumer for the reminders topic.
pub fn reminders_consumer(broker: &crate::config::BrokerConfig) -> Result<EventConsumer> {
    EventConsumer::from_config(broker, TOPIC_REMINDERS)
        .context("notification dispatcher requires a broker gateway")
}
