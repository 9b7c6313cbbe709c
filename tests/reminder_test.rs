//! Reminder lifecycle integration tests.

use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use tempfile::TempDir;

use taskd::dispatch::WorkerCounters;
use taskd::error::Error;
use taskd::events::publisher::{EventPublisher, PublishOutcome};
use taskd::events::{Event, EventType};
use taskd::reminders::{scanner, ReminderScheduler};
use taskd::storage::Storage;
use taskd::tasks::{CreateTask, Priority, TaskService};

/// Captures published events instead of touching a broker.
#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<(String, Event)>>,
}

impl RecordingPublisher {
    fn recorded(&self) -> Vec<(String, Event)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, event: &Event) -> PublishOutcome {
        self.events
            .lock()
            .unwrap()
            .push((topic.to_string(), event.clone()));
        PublishOutcome::Acked
    }
}

async fn make_storage() -> (Arc<Storage>, TempDir) {
    let dir = TempDir::new().unwrap();
    let storage = Storage::new(dir.path()).await.unwrap();
    (Arc::new(storage), dir)
}

async fn make_task(storage: &Arc<Storage>, publisher: &Arc<RecordingPublisher>) -> String {
    let service = TaskService::new(storage.clone(), publisher.clone());
    service
        .create_task(CreateTask {
            user_id: "u-1".into(),
            title: "Pay rent".into(),
            description: None,
            priority: Priority::Medium,
            tags: vec![],
            due_date: None,
            recurrence_rule: None,
        })
        .await
        .unwrap()
        .id
}

#[tokio::test]
async fn create_rejects_past_remind_at() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let task_id = make_task(&storage, &publisher).await;
    let scheduler = ReminderScheduler::new(storage.clone(), publisher.clone());

    let result = scheduler
        .create_reminder(&task_id, Utc::now() - Duration::hours(1))
        .await;
    assert!(matches!(result, Err(Error::InvalidReminderTime { .. })));

    // Nothing persisted, nothing published beyond the task_created event.
    assert!(storage.reminders_for_task(&task_id).await.unwrap().is_empty());
    assert_eq!(publisher.recorded().len(), 1);
}

#[tokio::test]
async fn create_rejects_missing_task() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let scheduler = ReminderScheduler::new(storage, publisher);

    let result = scheduler
        .create_reminder("no-such-task", Utc::now() + Duration::hours(1))
        .await;
    assert!(matches!(result, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn create_publishes_reminder_event_after_commit() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let task_id = make_task(&storage, &publisher).await;
    let scheduler = ReminderScheduler::new(storage.clone(), publisher.clone());

    let reminder = scheduler
        .create_reminder(&task_id, Utc::now() + Duration::hours(2))
        .await
        .unwrap();

    let events = publisher.recorded();
    let (topic, event) = events.last().unwrap();
    assert_eq!(topic, "reminders");
    assert_eq!(event.event_type, EventType::ReminderTriggered);
    assert_eq!(event.task_id, task_id);
    assert_eq!(event.payload["reminder_id"].as_str().unwrap(), reminder.id);
    // Creation publishes the scheduled stage — only "due" events are
    // delivered by the dispatcher.
    assert_eq!(event.payload["stage"], "scheduled");
}

#[tokio::test]
async fn due_reminders_ordered_earliest_first() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let task_id = make_task(&storage, &publisher).await;
    let scheduler = ReminderScheduler::new(storage.clone(), publisher.clone());

    // Insert through the store to backdate remind_at (the service would
    // reject past times).
    let now = Utc::now();
    let r3 = storage
        .insert_reminder(&task_id, now - Duration::minutes(1))
        .await
        .unwrap();
    let r1 = storage
        .insert_reminder(&task_id, now - Duration::minutes(30))
        .await
        .unwrap();
    let r2 = storage
        .insert_reminder(&task_id, now - Duration::minutes(10))
        .await
        .unwrap();

    let due = scheduler.due_reminders(now, 10).await.unwrap();
    let ids: Vec<&str> = due.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec![r1.id.as_str(), r2.id.as_str(), r3.id.as_str()]);

    // A not-yet-due reminder stays out of the list.
    scheduler
        .create_reminder(&task_id, now + Duration::hours(3))
        .await
        .unwrap();
    assert_eq!(scheduler.due_reminders(now, 10).await.unwrap().len(), 3);
}

#[tokio::test]
async fn mark_sent_is_idempotent() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let task_id = make_task(&storage, &publisher).await;
    let scheduler = ReminderScheduler::new(storage.clone(), publisher.clone());

    let reminder = storage
        .insert_reminder(&task_id, Utc::now() - Duration::minutes(5))
        .await
        .unwrap();
    assert!(!reminder.sent);

    let first = scheduler.mark_sent(&reminder.id).await.unwrap();
    assert!(first.sent);
    let sent_at = first.sent_at.clone().expect("sent_at set on transition");
    let events_after_first = publisher.recorded().len();

    let second = scheduler.mark_sent(&reminder.id).await.unwrap();
    assert!(second.sent);
    assert_eq!(second.sent_at.as_deref(), Some(sent_at.as_str()));
    // No second event for a no-op call.
    assert_eq!(publisher.recorded().len(), events_after_first);
}

#[tokio::test]
async fn delete_missing_reminder_is_not_found() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let scheduler = ReminderScheduler::new(storage, publisher);

    let result = scheduler.delete_reminder("missing").await;
    assert!(matches!(result, Err(Error::NotFound { .. })));
}

#[tokio::test]
async fn delete_all_for_task_removes_exactly_and_atomically() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let task_id = make_task(&storage, &publisher).await;
    let other_task = make_task(&storage, &publisher).await;
    let scheduler = ReminderScheduler::new(storage.clone(), publisher.clone());

    let now = Utc::now();
    for minutes in [5, 10, 15] {
        storage
            .insert_reminder(&task_id, now - Duration::minutes(minutes))
            .await
            .unwrap();
    }
    let keep = storage
        .insert_reminder(&other_task, now - Duration::minutes(1))
        .await
        .unwrap();

    let removed = scheduler.delete_all_for_task(&task_id).await.unwrap();
    assert_eq!(removed, 3);
    assert!(storage.reminders_for_task(&task_id).await.unwrap().is_empty());

    // Other tasks' reminders are untouched and still due.
    let due = scheduler.due_reminders(now, 10).await.unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, keep.id);
}

#[tokio::test]
async fn deleting_a_task_cancels_its_reminders() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let task_id = make_task(&storage, &publisher).await;
    let service = TaskService::new(storage.clone(), publisher.clone());
    let scheduler = ReminderScheduler::new(storage.clone(), publisher.clone());

    let now = Utc::now();
    storage
        .insert_reminder(&task_id, now - Duration::minutes(2))
        .await
        .unwrap();
    storage
        .insert_reminder(&task_id, now + Duration::hours(1))
        .await
        .unwrap();

    let removed = service.delete_task(&task_id).await.unwrap();
    assert_eq!(removed, 2);

    // No reminder for a deleted task ever surfaces as due.
    assert!(scheduler.due_reminders(now, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn scanner_publishes_due_reminders_earliest_first() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let task_id = make_task(&storage, &publisher).await;
    let counters = WorkerCounters::new();

    let now = Utc::now();
    let late = storage
        .insert_reminder(&task_id, now - Duration::minutes(1))
        .await
        .unwrap();
    let early = storage
        .insert_reminder(&task_id, now - Duration::minutes(20))
        .await
        .unwrap();

    let shared: taskd::events::publisher::SharedPublisher = publisher.clone();
    let published = scanner::publish_due_reminders(&storage, &shared, &counters, 10)
        .await
        .unwrap();
    assert_eq!(published, 2);

    let events: Vec<Event> = publisher
        .recorded()
        .into_iter()
        .filter(|(topic, _)| topic == "reminders")
        .map(|(_, e)| e)
        .collect();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].payload["reminder_id"], early.id.as_str());
    assert_eq!(events[1].payload["reminder_id"], late.id.as_str());
    assert!(events.iter().all(|e| e.payload["stage"] == "due"));
    assert_eq!(
        counters.snapshot().processed,
        2,
        "acked publishes are counted as processed"
    );
}
