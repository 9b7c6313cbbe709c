//! Asynchronous event envelopes and topics.
//!
//! Events are ephemeral: constructed, published, and discarded. Nothing in
//! this module touches the store.
//!
//! Wire format (JSON):
//! `{"event_type", "task_id", "user_id", "timestamp", "payload"}`

pub mod consumer;
pub mod publisher;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic carrying task lifecycle events.
pub const TOPIC_TASK_EVENTS: &str = "task-events";
/// Topic carrying reminder-due events.
pub const TOPIC_REMINDERS: &str = "reminders";

/// All distinct event kinds exchanged over the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskCreated,
    TaskUpdated,
    TaskDeleted,
    TaskCompletionToggled,
    RecurringTaskGenerated,
    ReminderTriggered,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskDeleted => "task_deleted",
            Self::TaskCompletionToggled => "task_completion_toggled",
            Self::RecurringTaskGenerated => "recurring_task_generated",
            Self::ReminderTriggered => "reminder_triggered",
        }
    }
}

/// A single event envelope placed on a named topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_type: EventType,
    pub task_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: EventType, task_id: &str, user_id: &str, payload: Value) -> Self {
        Self {
            event_type,
            task_id: task_id.to_string(),
            user_id: user_id.to_string(),
            timestamp: Utc::now(),
            payload,
        }
    }

    /// `stage` distinguishes why the event fired: "scheduled" (reminder
    /// created), "due" (due-detection — the dispatcher delivers these), or
    /// "sent" (delivery confirmed).
    pub fn reminder_triggered(
        task_id: &str,
        user_id: &str,
        reminder_id: &str,
        remind_at: &str,
        stage: &str,
    ) -> Self {
        Self::new(
            EventType::ReminderTriggered,
            task_id,
            user_id,
            serde_json::json!({
                "reminder_id": reminder_id,
                "reminder_time": remind_at,
                "stage": stage,
            }),
        )
    }

    pub fn recurring_task_generated(task_id: &str, user_id: &str, next_occurrence: &str) -> Self {
        Self::new(
            EventType::RecurringTaskGenerated,
            task_id,
            user_id,
            serde_json::json!({ "next_occurrence": next_occurrence }),
        )
    }

    pub fn task_completion_toggled(task_id: &str, user_id: &str, is_completed: bool) -> Self {
        Self::new(
            EventType::TaskCompletionToggled,
            task_id,
            user_id,
            serde_json::json!({ "is_completed": is_completed }),
        )
    }

    pub fn task_created(task_id: &str, user_id: &str) -> Self {
        Self::new(EventType::TaskCreated, task_id, user_id, Value::Null)
    }

    pub fn task_deleted(task_id: &str, user_id: &str, reminders_removed: u64) -> Self {
        Self::new(
            EventType::TaskDeleted,
            task_id,
            user_id,
            serde_json::json!({ "reminders_removed": reminders_removed }),
        )
    }

    /// Identity used to suppress at-least-once redelivery at the consumer
    /// boundary. Derived from stable fields — the occurrence or remind time
    /// when the payload carries one — so a redelivered event maps to the same
    /// key while distinct occurrences of the same task do not.
    pub fn idempotency_key(&self) -> String {
        let discriminant = self
            .payload
            .get("reminder_id")
            .or_else(|| self.payload.get("reminder_time"))
            .or_else(|| self.payload.get("next_occurrence"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.timestamp.to_rfc3339());
        let stage = self
            .payload
            .get("stage")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        format!(
            "{}:{}:{}:{}",
            self.event_type.as_str(),
            self.task_id,
            discriminant,
            stage
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_shape() {
        let event = Event::reminder_triggered("t-1", "u-1", "r-1", "2026-01-01T08:00:00Z", "due");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "reminder_triggered");
        assert_eq!(json["task_id"], "t-1");
        assert_eq!(json["user_id"], "u-1");
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
        assert_eq!(json["payload"]["reminder_id"], "r-1");

        let back: Event = serde_json::from_value(json).unwrap();
        assert_eq!(back.event_type, EventType::ReminderTriggered);
    }

    #[test]
    fn redelivery_maps_to_same_key() {
        let a = Event::recurring_task_generated("t-1", "u-1", "2026-03-01T00:00:00Z");
        let b = Event::recurring_task_generated("t-1", "u-1", "2026-03-01T00:00:00Z");
        assert_eq!(a.idempotency_key(), b.idempotency_key());

        let c = Event::recurring_task_generated("t-1", "u-1", "2026-04-01T00:00:00Z");
        assert_ne!(a.idempotency_key(), c.idempotency_key());
    }
}
