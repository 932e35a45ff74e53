//! Integration tests for the persisted task store

use chrono::{Duration, Utc};
use repo_harvester::tasks::{TaskError, TaskStatus, TaskTracker};
use serde_json::{json, Map};
use std::fs;
use tempfile::TempDir;

fn tracker(tmp: &TempDir) -> TaskTracker {
    TaskTracker::new(tmp.path().join("tasks"), tmp.path().join("cache"))
}

/// Write a raw in-progress record updated `minutes_ago` minutes ago.
fn write_record(tracker: &TaskTracker, id: &str, minutes_ago: i64) {
    let updated = Utc::now() - Duration::minutes(minutes_ago);
    let created = updated - Duration::minutes(5);
    let record = json!({
        "id": id,
        "type": "repository",
        "params": {"repo_url": format!("https://github.com/acme/{id}")},
        "description": format!("Task {id}"),
        "status": "in_progress",
        "progress": 40.0,
        "current_stage": "crawling",
        "stage_progress": 10.0,
        "created_at": created,
        "updated_at": updated,
        "stages": [],
    });
    fs::create_dir_all(tracker.tasks_dir()).unwrap();
    fs::write(
        tracker.tasks_dir().join(format!("{id}.json")),
        serde_json::to_vec_pretty(&record).unwrap(),
    )
    .unwrap();
}

#[test]
fn test_stage_history() {
    let tmp = TempDir::new().unwrap();
    let tracker = tracker(&tmp);
    let id = tracker
        .create_task("organization", Map::new(), "Stages")
        .unwrap();

    tracker
        .update_task_progress(&id, 10.0, Some("A"), Some(50.0))
        .unwrap();
    let task = tracker
        .update_task_progress(&id, 20.0, Some("A"), Some(100.0))
        .unwrap();
    assert!(task.stages.is_empty());
    assert_eq!(task.stage_progress, 100.0);

    let task = tracker
        .update_task_progress(&id, 30.0, Some("B"), None)
        .unwrap();
    assert_eq!(task.stages.len(), 1);
    assert_eq!(task.stages[0].name, "A");
    assert_eq!(task.current_stage.as_deref(), Some("B"));
    assert_eq!(task.stage_progress, 0.0);
    assert_eq!(task.status, TaskStatus::InProgress);

    let stored = tracker.get_task(&id).unwrap().unwrap();
    assert_eq!(stored, task);
}

#[test]
fn test_stage_started_at_marks_transitions() {
    let tmp = TempDir::new().unwrap();
    let tracker = tracker(&tmp);
    let id = tracker
        .create_task("organization", Map::new(), "Stage timing")
        .unwrap();
    assert!(tracker.get_task(&id).unwrap().unwrap().stage_started_at.is_none());

    let first = tracker
        .update_task_progress(&id, 5.0, Some("listing"), Some(25.0))
        .unwrap();
    let listing_started = first.stage_started_at.unwrap();

    std::thread::sleep(std::time::Duration::from_millis(10));
    let same = tracker
        .update_task_progress(&id, 15.0, Some("listing"), Some(75.0))
        .unwrap();
    assert_eq!(same.stage_started_at, Some(listing_started));
    assert!(same.updated_at > first.updated_at);

    // No stage given keeps the current one
    let unnamed = tracker.update_task_progress(&id, 18.0, None, None).unwrap();
    assert_eq!(unnamed.stage_started_at, Some(listing_started));

    std::thread::sleep(std::time::Duration::from_millis(10));
    let next = tracker
        .update_task_progress(&id, 20.0, Some("crawling"), None)
        .unwrap();
    let crawling_started = next.stage_started_at.unwrap();
    assert!(crawling_started > listing_started);
    assert_eq!(crawling_started, next.updated_at);
}

#[test]
fn test_complete_and_fail() {
    let tmp = TempDir::new().unwrap();
    let tracker = tracker(&tmp);

    let done = tracker.create_task("repository", Map::new(), "ok").unwrap();
    tracker
        .update_task_progress(&done, 50.0, Some("crawling"), None)
        .unwrap();
    let task = tracker
        .complete_task(&done, true, Some(json!({"files": 3})))
        .unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100.0);
    assert!(task.completed_at.is_some());
    assert_eq!(task.stages.len(), 1);
    assert_eq!(task.result, Some(json!({"files": 3})));

    let failed = tracker.create_task("repository", Map::new(), "bad").unwrap();
    let task = tracker.fail_task(&failed, "boom").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.error_message(), Some("boom"));
}

#[test]
fn test_cancel_is_idempotent_and_not_resumable() {
    let tmp = TempDir::new().unwrap();
    let tracker = tracker(&tmp);
    let id = tracker.create_task("repository", Map::new(), "cancel").unwrap();
    tracker
        .update_task_progress(&id, 25.0, Some("crawling"), None)
        .unwrap();

    let first = tracker.cancel_task(&id).unwrap();
    let second = tracker.cancel_task(&id).unwrap();
    assert_eq!(first.status, TaskStatus::Cancelled);
    assert_eq!(second.cancelled_at, first.cancelled_at);
    assert_eq!(second.updated_at, first.updated_at);

    assert!(tracker.list_resumable_tasks().unwrap().is_empty());
    // Record is kept
    assert!(tracker.get_task(&id).unwrap().is_some());

    match tracker.update_task_progress(&id, 30.0, None, None) {
        Err(TaskError::InvalidTransition {
            from: TaskStatus::Cancelled,
            ..
        }) => {}
        other => panic!("Expected invalid transition, got {other:?}"),
    }
}

#[test]
fn test_completed_task_cannot_be_cancelled() {
    let tmp = TempDir::new().unwrap();
    let tracker = tracker(&tmp);
    let id = tracker.create_task("repository", Map::new(), "done").unwrap();
    tracker.complete_task(&id, true, None).unwrap();

    assert!(matches!(
        tracker.cancel_task(&id),
        Err(TaskError::InvalidTransition { .. })
    ));
    assert!(matches!(
        tracker.complete_task(&id, false, None),
        Err(TaskError::InvalidTransition { .. })
    ));
}

#[test]
fn test_resumable_tasks_most_recent_first() {
    let tmp = TempDir::new().unwrap();
    let tracker = tracker(&tmp);
    write_record(&tracker, "repository_20240101_000000", 90);
    write_record(&tracker, "repository_20240101_000100", 50);
    tracker
        .create_task("repository", Map::new(), "never started")
        .unwrap();

    let resumable = tracker.list_resumable_tasks_at(Utc::now()).unwrap();

    assert_eq!(resumable.len(), 2);
    assert_eq!(resumable[0].task.id, "repository_20240101_000100");
    assert_eq!(resumable[0].updated_ago, "50 minutes ago");
    assert_eq!(resumable[1].task.id, "repository_20240101_000000");
    assert_eq!(resumable[1].updated_ago, "90 minutes ago");
}

#[test]
fn test_list_tasks_skips_unreadable_records() {
    let tmp = TempDir::new().unwrap();
    let tracker = tracker(&tmp);
    write_record(&tracker, "repository_20240101_000000", 10);
    fs::write(tracker.tasks_dir().join("garbage.json"), b"{not json").unwrap();

    let tasks = tracker.list_tasks().unwrap();

    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, "repository_20240101_000000");
}

#[test]
fn test_list_tasks_newest_first() {
    let tmp = TempDir::new().unwrap();
    let tracker = tracker(&tmp);
    write_record(&tracker, "repository_20240101_000000", 90);
    write_record(&tracker, "repository_20240101_000100", 10);

    let ids: Vec<String> = tracker
        .list_tasks()
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();

    assert_eq!(
        ids,
        vec!["repository_20240101_000100", "repository_20240101_000000"]
    );
}

#[test]
fn test_missing_task() {
    let tmp = TempDir::new().unwrap();
    let tracker = tracker(&tmp);

    assert!(tracker.get_task("repository_19990101_000000").unwrap().is_none());
    assert!(tracker.get_task("../escape").unwrap().is_none());
    assert!(matches!(
        tracker.cancel_task("repository_19990101_000000"),
        Err(TaskError::NotFound(_))
    ));
}

#[test]
fn test_cache_size_and_clear() {
    let tmp = TempDir::new().unwrap();
    let tracker = tracker(&tmp);
    assert_eq!(tracker.get_cache_size().unwrap(), 0.0);

    let nested = tracker.cache_dir().join("acme/widgets/docs");
    fs::create_dir_all(&nested).unwrap();
    for i in 0..3 {
        fs::write(nested.join(format!("f{i}.bin")), vec![0u8; 2 * 1024 * 1024]).unwrap();
    }

    let size = tracker.get_cache_size().unwrap();
    assert!((size - 6.0).abs() < 1e-9, "unexpected size {size}");

    tracker.clear_cache().unwrap();
    assert_eq!(tracker.get_cache_size().unwrap(), 0.0);
}
