//! Error taxonomy for the scheduling core.
//!
//! Validation failures are rejected synchronously and never reach the store.
//! Storage failures abort the in-progress operation and suppress the
//! corresponding event. Broker/transport failures are NOT represented here —
//! they are absorbed inside the publisher and surface as a degraded outcome,
//! never as an error to the caller.

use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed recurrence rule (interval, end condition, or date value).
    #[error("invalid recurrence rule: {0}")]
    InvalidRule(String),

    /// `remind_at` was not strictly in the future at creation time.
    #[error("reminder time {remind_at} is not in the future (now: {now})")]
    InvalidReminderTime {
        remind_at: DateTime<Utc>,
        now: DateTime<Utc>,
    },

    /// The task or reminder targeted by a mutating operation does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Underlying store failure.
    #[error("storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::Storage(format!("{e:#}"))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl Error {
    pub fn task_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "task",
            id: id.into(),
        }
    }

    pub fn reminder_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "reminder",
            id: id.into(),
        }
    }
}
