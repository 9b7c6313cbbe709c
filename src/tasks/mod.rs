//! Task hooks that feed the scheduling core.
//!
//! This is not a full CRUD surface — only the operations the recurrence and
//! reminder engines hang off: creation (rule validation), completion toggling
//! (coordinator trigger), and deletion (bulk reminder cancel).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::events::publisher::SharedPublisher;
use crate::events::{Event, TOPIC_TASK_EVENTS};
use crate::recurrence::RecurrenceRule;
use crate::recurring::RecurringTaskCoordinator;
use crate::storage::{NewTask, Storage, TaskRow};

/// Task priority — a fixed small set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(format!(
                "unknown priority '{other}' (expected low|medium|high)"
            )),
        }
    }
}

pub struct CreateTask {
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub tags: Vec<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub recurrence_rule: Option<RecurrenceRule>,
}

pub struct TaskService {
    storage: Arc<Storage>,
    publisher: SharedPublisher,
    coordinator: RecurringTaskCoordinator,
}

impl TaskService {
    pub fn new(storage: Arc<Storage>, publisher: SharedPublisher) -> Self {
        let coordinator = RecurringTaskCoordinator::new(storage.clone(), publisher.clone());
        Self {
            storage,
            publisher,
            coordinator,
        }
    }

    /// Create a task. A recurrence rule, when present, is validated before
    /// anything is persisted — no partially-valid rule ever reaches the
    /// store.
    pub async fn create_task(&self, create: CreateTask) -> Result<TaskRow> {
        if let Some(rule) = &create.recurrence_rule {
            rule.validate()?;
        }

        let has_rule = create.recurrence_rule.is_some();
        let new = NewTask {
            user_id: create.user_id,
            title: create.title,
            description: create.description,
            priority: create.priority.as_str().to_string(),
            tags: create.tags,
            due_date: create.due_date,
            recurrence_rule: create.recurrence_rule,
            series_id: None,
        };
        let task = self.storage.insert_task(&new).await?;
        info!(task_id = %task.id, user_id = %task.user_id, recurring = has_rule, "task created");

        let event = Event::task_created(&task.id, &task.user_id);
        self.publisher.publish(TOPIC_TASK_EVENTS, &event).await;

        Ok(task)
    }

    pub async fn get_task(&self, task_id: &str) -> Result<TaskRow> {
        self.storage
            .get_task(task_id)
            .await?
            .ok_or_else(|| Error::task_not_found(task_id))
    }

    pub async fn list_tasks(&self, user_id: &str) -> Result<Vec<TaskRow>> {
        Ok(self.storage.list_tasks_for_user(user_id).await?)
    }

    /// Flip a task's completion flag. On the transition to completed the
    /// recurring coordinator runs and may spawn a successor.
    ///
    /// Returns the updated task and the successor, if one was spawned. A
    /// coordinator failure (e.g. a corrupt stored rule) is logged and does
    /// not undo the completion — the toggle itself already committed.
    pub async fn toggle_completion(&self, task_id: &str) -> Result<(TaskRow, Option<TaskRow>)> {
        let task = self.get_task(task_id).await?;
        let now = Utc::now();
        let completing = !task.is_completed;

        let updated = self
            .storage
            .set_task_completion(task_id, completing, completing.then_some(now))
            .await?
            .ok_or_else(|| Error::task_not_found(task_id))?;

        let event = Event::task_completion_toggled(&updated.id, &updated.user_id, completing);
        self.publisher.publish(TOPIC_TASK_EVENTS, &event).await;

        let successor = if completing {
            match self.coordinator.on_task_completed(&updated, now).await {
                Ok(successor) => successor,
                Err(e) => {
                    warn!(task_id, err = %e, "recurring coordinator failed — completion stands");
                    None
                }
            }
        } else {
            None
        };

        Ok((updated, successor))
    }

    /// Delete a task. Its reminders are cancelled in the same transaction so
    /// no reminder ever fires for a non-existent task.
    pub async fn delete_task(&self, task_id: &str) -> Result<u64> {
        let task = self.get_task(task_id).await?;

        let reminders_removed = self
            .storage
            .delete_task_with_reminders(task_id)
            .await?
            .ok_or_else(|| Error::task_not_found(task_id))?;

        info!(task_id, reminders_removed, "task deleted");

        let event = Event::task_deleted(task_id, &task.user_id, reminders_removed);
        self.publisher.publish(TOPIC_TASK_EVENTS, &event).await;

        Ok(reminders_removed)
    }
}
