//! Successor spawning for recurring tasks.
//!
//! Reacts to a task's transition to completed. The next occurrence is
//! anchored on the task's original due date when it has one (the series stays
//! aligned to its calendar schedule regardless of when the user actually
//! completed it), falling back to the completion timestamp for tasks without
//! a due date. A UNIQUE-keyed spawn ledger makes retried completion
//! notifications spawn exactly one successor.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::error::Result;
use crate::events::publisher::SharedPublisher;
use crate::events::{Event, TOPIC_TASK_EVENTS};
use crate::recurrence::{next_occurrence, series_complete};
use crate::storage::{fmt_ts, NewTask, Storage, TaskRow};

pub struct RecurringTaskCoordinator {
    storage: Arc<Storage>,
    publisher: SharedPublisher,
}

impl RecurringTaskCoordinator {
    pub fn new(storage: Arc<Storage>, publisher: SharedPublisher) -> Self {
        Self { storage, publisher }
    }

    /// Handle a task that just transitioned to completed. Returns the spawned
    /// successor, or `None` when the task is not recurring, its series has
    /// ended, or this occurrence was already spawned.
    ///
    /// `completed_at` is the timestamp stamped by the completion hook — the
    /// anchor fallback is explicit, never an implicit clock read here.
    pub async fn on_task_completed(
        &self,
        task: &TaskRow,
        completed_at: DateTime<Utc>,
    ) -> Result<Option<TaskRow>> {
        let Some(rule) = task.rule() else {
            return Ok(None);
        };
        if !rule.enabled {
            debug!(task_id = %task.id, "recurrence rule disabled — no successor");
            return Ok(None);
        }

        let anchor = task.due_date_utc().unwrap_or(completed_at);
        let next_date = next_occurrence(anchor, &rule)?;

        let series_id = task.series_key().to_string();
        let spawned_so_far = self.storage.spawn_count(&series_id).await?;
        if series_complete(&rule, spawned_so_far, next_date) {
            info!(
                task_id = %task.id,
                series_id = %series_id,
                spawned = spawned_so_far,
                "recurring series reached its end condition — no successor"
            );
            return Ok(None);
        }

        // Same title, priority, tags, and rule; fresh completion state.
        let successor = NewTask {
            user_id: task.user_id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            priority: task.priority.clone(),
            tags: task.tags_vec(),
            due_date: Some(next_date),
            recurrence_rule: Some(rule),
            series_id: Some(series_id.clone()),
        };

        let key = spawn_key(&task.id, next_date);
        let Some(spawned) = self
            .storage
            .create_spawned_task(&key, &series_id, &task.id, next_date, &successor)
            .await?
        else {
            debug!(task_id = %task.id, key = %key, "occurrence already spawned — skipping");
            return Ok(None);
        };

        info!(
            task_id = %task.id,
            spawned_task_id = %spawned.id,
            next_date = %fmt_ts(next_date),
            "spawned recurring successor"
        );

        // Store write committed; event is best-effort.
        let event =
            Event::recurring_task_generated(&spawned.id, &spawned.user_id, &fmt_ts(next_date));
        self.publisher.publish(TOPIC_TASK_EVENTS, &event).await;

        Ok(Some(spawned))
    }
}

/// Idempotency key for one occurrence of one task: sha256(task_id ‖ next_date).
fn spawn_key(task_id: &str, next_date: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(task_id.as_bytes());
    hasher.update(b":");
    hasher.update(fmt_ts(next_date).as_bytes());
    format!("{:x}", hasher.finalize())
}
