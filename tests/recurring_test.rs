//! Recurring-task coordinator integration tests.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone as _, Utc};
use tempfile::TempDir;

use taskd::events::publisher::{EventPublisher, PublishOutcome};
use taskd::events::{Event, EventType};
use taskd::recurrence::{EndCondition, Frequency, RecurrenceRule};
use taskd::recurring::RecurringTaskCoordinator;
use taskd::storage::Storage;
use taskd::tasks::{CreateTask, Priority, TaskService};

#[derive(Default)]
struct RecordingPublisher {
    events: Mutex<Vec<(String, Event)>>,
}

impl RecordingPublisher {
    fn recorded(&self) -> Vec<(String, Event)> {
        self.events.lock().unwrap().clone()
    }

    fn of_type(&self, event_type: EventType) -> Vec<Event> {
        self.recorded()
            .into_iter()
            .filter(|(_, e)| e.event_type == event_type)
            .map(|(_, e)| e)
            .collect()
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

fn weekly_create(due: Option<DateTime<Utc>>, rule: Option<RecurrenceRule>) -> CreateTask {
    CreateTask {
        user_id: "u-1".into(),
        title: "Water the plants".into(),
        description: Some("Front and back".into()),
        priority: Priority::High,
        tags: vec!["home".into(), "garden".into()],
        due_date: due,
        recurrence_rule: rule,
    }
}

#[tokio::test]
async fn completing_recurring_task_spawns_exactly_one_successor() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let service = TaskService::new(storage.clone(), publisher.clone());

    let due = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap();
    let rule = RecurrenceRule::new(Frequency::Weekly, 1);
    let task = service
        .create_task(weekly_create(Some(due), Some(rule.clone())))
        .await
        .unwrap();

    let (completed, successor) = service.toggle_completion(&task.id).await.unwrap();
    assert!(completed.is_completed);

    let successor = successor.expect("successor spawned");
    assert_eq!(successor.title, task.title);
    assert_eq!(successor.priority, task.priority);
    assert_eq!(successor.tags_vec(), task.tags_vec());
    assert!(!successor.is_completed);
    assert!(!successor.reminder_sent);
    // Anchored on the original due date, not the completion instant.
    assert_eq!(
        successor.due_date_utc().unwrap(),
        due + Duration::weeks(1)
    );
    // Rule carried forward unmodified.
    assert_eq!(successor.rule().unwrap(), rule);
    // Successors stay in the same series.
    assert_eq!(successor.series_id.as_deref(), Some(task.id.as_str()));

    let spawned_events = publisher.of_type(EventType::RecurringTaskGenerated);
    assert_eq!(spawned_events.len(), 1);
    assert_eq!(spawned_events[0].task_id, successor.id);

    // Exactly two tasks exist for the user.
    assert_eq!(service.list_tasks("u-1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn non_recurring_and_disabled_rules_spawn_nothing() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let service = TaskService::new(storage.clone(), publisher.clone());

    let plain = service.create_task(weekly_create(None, None)).await.unwrap();
    let (_, successor) = service.toggle_completion(&plain.id).await.unwrap();
    assert!(successor.is_none());

    let mut disabled = RecurrenceRule::new(Frequency::Daily, 1);
    disabled.enabled = false;
    let task = service
        .create_task(weekly_create(None, Some(disabled)))
        .await
        .unwrap();
    let (_, successor) = service.toggle_completion(&task.id).await.unwrap();
    assert!(successor.is_none());

    assert!(publisher.of_type(EventType::RecurringTaskGenerated).is_empty());
    assert_eq!(service.list_tasks("u-1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn retried_completion_spawns_once() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let service = TaskService::new(storage.clone(), publisher.clone());
    let coordinator = RecurringTaskCoordinator::new(storage.clone(), publisher.clone());

    let due = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap();
    let task = service
        .create_task(weekly_create(
            Some(due),
            Some(RecurrenceRule::new(Frequency::Weekly, 1)),
        ))
        .await
        .unwrap();

    let (completed, first) = service.toggle_completion(&task.id).await.unwrap();
    assert!(first.is_some());

    // A redelivered completion notification computes the same occurrence and
    // hits the spawn ledger.
    let completed_at = completed.completed_at_utc().unwrap();
    let retry = coordinator
        .on_task_completed(&completed, completed_at)
        .await
        .unwrap();
    assert!(retry.is_none(), "duplicate completion must not spawn");

    assert_eq!(service.list_tasks("u-1").await.unwrap().len(), 2);
    assert_eq!(publisher.of_type(EventType::RecurringTaskGenerated).len(), 1);
}

#[tokio::test]
async fn after_count_end_condition_stops_the_series() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let service = TaskService::new(storage.clone(), publisher.clone());

    let due = Utc.with_ymd_and_hms(2026, 8, 3, 9, 0, 0).unwrap();
    let rule = RecurrenceRule::new(Frequency::Daily, 1)
        .with_end_condition(EndCondition::AfterCount(1));
    let task = service
        .create_task(weekly_create(Some(due), Some(rule)))
        .await
        .unwrap();

    // First completion: one successor allowed.
    let (_, first) = service.toggle_completion(&task.id).await.unwrap();
    let first = first.expect("first successor spawned");

    // Completing the successor: the series has already spawned its one
    // occurrence, so it ends here.
    let (_, second) = service.toggle_completion(&first.id).await.unwrap();
    assert!(second.is_none(), "series past after_count must stop");

    assert_eq!(service.list_tasks("u-1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn anchor_falls_back_to_completion_time_without_due_date() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let service = TaskService::new(storage.clone(), publisher.clone());

    let before = Utc::now();
    let task = service
        .create_task(weekly_create(
            None,
            Some(RecurrenceRule::new(Frequency::Daily, 1)),
        ))
        .await
        .unwrap();

    let (_, successor) = service.toggle_completion(&task.id).await.unwrap();
    let successor = successor.expect("successor spawned");

    let next_due = successor.due_date_utc().unwrap();
    assert!(next_due >= before + Duration::days(1));
    assert!(next_due <= Utc::now() + Duration::days(1));
}

#[tokio::test]
async fn reopening_a_task_spawns_nothing() {
    let (storage, _dir) = make_storage().await;
    let publisher = Arc::new(RecordingPublisher::default());
    let service = TaskService::new(storage.clone(), publisher.clone());

    let task = service
        .create_task(weekly_create(
            None,
            Some(RecurrenceRule::new(Frequency::Daily, 1)),
        ))
        .await
        .unwrap();

    let (_, first) = service.toggle_completion(&task.id).await.unwrap();
    assert!(first.is_some());

    // Toggle back to open — the coordinator only runs on the transition to
    // completed.
    let (reopened, second) = service.toggle_completion(&task.id).await.unwrap();
    assert!(!reopened.is_completed);
    assert!(second.is_none());
    assert_eq!(publisher.of_type(EventType::RecurringTaskGenerated).len(), 1);
}
