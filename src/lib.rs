pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod recurrence;
pub mod recurring;
pub mod reminders;
pub mod storage;
pub mod tasks;

use std::sync::Arc;

use anyhow::Result;

use config::TaskdConfig;
use events::publisher::{self, SharedPublisher};
use storage::Storage;

/// Shared application state passed to every service and background task.
///
/// The publisher is selected exactly once here, at startup, and injected into
/// every component that publishes — components never discover transport on
/// their own.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<TaskdConfig>,
    pub storage: Arc<Storage>,
    pub publisher: SharedPublisher,
}

impl AppContext {
    /// Open the store, select the publisher, and assemble shared state.
    pub async fn init(config: TaskdConfig) -> Result<Self> {
        let storage = Storage::new_with_slow_query(
            &config.data_dir,
            config.observability.slow_query_threshold_ms,
        )
        .await?;
        let publisher = publisher::from_config(&config.broker);

        Ok(Self {
            config: Arc::new(config),
            storage: Arc::new(storage),
            publisher,
        })
    }

    pub fn task_service(&self) -> tasks::TaskService {
        tasks::TaskService::new(self.storage.clone(), self.publisher.clone())
    }

    pub fn reminder_scheduler(&self) -> reminders::ReminderScheduler {
        reminders::ReminderScheduler::new(self.storage.clone(), self.publisher.clone())
    }
}
