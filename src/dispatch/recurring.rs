//! Recurring-task event handler — the `taskd recurring` process.
//!
//! Observes `task_completion_toggled` and `recurring_task_generated` events
//! from the "task-events" topic for logging and counters. The authoritative
//! successor-creation logic lives in the coordinator inside the serving
//! process; this worker only watches the series unfold.

use anyhow::{Context as _, Result};
use tracing::info;

use crate::events::consumer::{DedupeWindow, EventConsumer};
use crate::events::{EventType, TOPIC_TASK_EVENTS};

use super::SharedCounters;

const DEDUPE_CAPACITY: usize = 4096;

/// Run the observer loop until the process is stopped.
pub async fn run_recurring_observer(consumer: EventConsumer, counters: SharedCounters) -> Result<()> {
    info!(topic = consumer.topic(), "recurring task event handler started");
    let mut dedupe = DedupeWindow::new(DEDUPE_CAPACITY);

    loop {
        let batch = consumer.poll_batch().await;
        for event in batch {
            if !dedupe.insert(&event.idempotency_key()) {
                counters.inc_deduped();
                continue;
            }

            match event.event_type {
                EventType::TaskCompletionToggled => {
                    info!(
                        task_id = %event.task_id,
                        user_id = %event.user_id,
                        payload = %event.payload,
                        "observed task completion toggle"
                    );
                    counters.inc_processed();
                }
                EventType::RecurringTaskGenerated => {
                    info!(
                        task_id = %event.task_id,
                        user_id = %event.user_id,
                        next_occurrence = %event
                            .payload
                            .get("next_occurrence")
                            .and_then(|v| v.as_str())
                            .unwrap_or(""),
                        "observed recurring successor"
                    );
                    counters.inc_processed();
                }
                _ => counters.inc_ignored(),
            }
        }
    }
}

/// Build the consumer for the task-events topic.
pub fn task_events_consumer(broker: &crate::config::BrokerConfig) -> Result<EventConsumer> {
    EventConsumer::from_config(broker, TOPIC_TASK_EVENTS)
        .context("recurring task event handler requires a broker gateway")
}
