//! Reminder lifecycle: create, list due, mark sent, delete.
//!
//! Every state change commits before its event is published; publish
//! failures never roll anything back. Validation failures reject before the
//! store is touched.

pub mod scanner;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::publisher::SharedPublisher;
use crate::events::{Event, TOPIC_REMINDERS};
use crate::storage::{ReminderRow, Storage};

pub struct ReminderScheduler {
    storage: Arc<Storage>,
    publisher: SharedPublisher,
}

impl ReminderScheduler {
    pub fn new(storage: Arc<Storage>, publisher: SharedPublisher) -> Self {
        Self { storage, publisher }
    }

    /// Create a reminder for a task. Rejects any `remind_at` not strictly
    /// after the current time, and any task that does not exist (a reminder
    /// must never reference a missing task).
    pub async fn create_reminder(
        &self,
        task_id: &str,
        remind_at: DateTime<Utc>,
    ) -> Result<ReminderRow> {
        let now = Utc::now();
        if remind_at <= now {
            return Err(Error::InvalidReminderTime { remind_at, now });
        }

        let task = self
            .storage
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::task_not_found(task_id))?;

        let reminder = self.storage.insert_reminder(task_id, remind_at).await?;
        debug!(reminder_id = %reminder.id, task_id, remind_at = %reminder.remind_at, "reminder created");

        // State is committed; the event is best-effort.
        let event = Event::reminder_triggered(
            task_id,
            &task.user_id,
            &reminder.id,
            &reminder.remind_at,
            "scheduled",
        );
        self.publisher.publish(TOPIC_REMINDERS, &event).await;

        Ok(reminder)
    }

    /// All unsent reminders with `remind_at <= as_of`, earliest due first.
    pub async fn due_reminders(&self, as_of: DateTime<Utc>, limit: i64) -> Result<Vec<ReminderRow>> {
        Ok(self.storage.due_reminders(as_of, limit).await?)
    }

    /// All reminders attached to a task, by due time.
    pub async fn reminders_for_task(&self, task_id: &str) -> Result<Vec<ReminderRow>> {
        Ok(self.storage.reminders_for_task(task_id).await?)
    }

    /// Unsent reminders whose due time has already passed.
    pub async fn overdue_reminders(&self) -> Result<Vec<ReminderRow>> {
        Ok(self.storage.overdue_reminders(Utc::now()).await?)
    }

    /// Mark a reminder sent. Idempotent: a reminder that is already sent is
    /// returned unchanged and no event is published — `sent` transitions
    /// false→true exactly once and `sent_at` is set only with that
    /// transition.
    pub async fn mark_sent(&self, reminder_id: &str) -> Result<ReminderRow> {
        let transitioned = self
            .storage
            .mark_reminder_sent(reminder_id, Utc::now())
            .await?;

        let reminder = self
            .storage
            .get_reminder(reminder_id)
            .await?
            .ok_or_else(|| Error::reminder_not_found(reminder_id))?;

        if transitioned > 0 {
            if let Some(task) = self.storage.get_task(&reminder.task_id).await? {
                let event = Event::reminder_triggered(
                    &reminder.task_id,
                    &task.user_id,
                    &reminder.id,
                    &reminder.remind_at,
                    "sent",
                );
                self.publisher.publish(TOPIC_REMINDERS, &event).await;
            }
        }

        Ok(reminder)
    }

    /// Remove a single reminder. `NotFound` when it does not exist.
    pub async fn delete_reminder(&self, reminder_id: &str) -> Result<()> {
        if !self.storage.delete_reminder(reminder_id).await? {
            return Err(Error::reminder_not_found(reminder_id));
        }
        debug!(reminder_id, "reminder deleted");
        Ok(())
    }

    /// Remove every reminder for a task atomically; returns the exact count
    /// removed. Used when the owning task is deleted.
    pub async fn delete_all_for_task(&self, task_id: &str) -> Result<u64> {
        let removed = self.storage.delete_reminders_for_task(task_id).await?;
        debug!(task_id, removed, "reminders bulk-deleted");
        Ok(removed)
    }
}
