//! Integration tests for tracked fetch jobs

use repo_harvester::config::HarvestConfig;
use repo_harvester::orchestrator::runner::{STAGE_CRAWLING, STAGE_LISTING};
use repo_harvester::orchestrator::{
    FetchError, FetchOrchestrator, RunError, TaskRunner, CANCELLED_MESSAGE,
};
use repo_harvester::progress::{NoopProgress, RecordingProgress};
use repo_harvester::tasks::{TaskError, TaskStatus, TaskTracker};
use repo_harvester::{CancellationSignal, GithubError};
use std::sync::Arc;
use tempfile::TempDir;

use crate::support::fake_api::FakeApi;

fn runner(api: FakeApi, tmp: &TempDir) -> TaskRunner {
    let config = HarvestConfig::default().with_data_root(tmp.path());
    let tracker = TaskTracker::from_config(&config);
    TaskRunner::new(FetchOrchestrator::new(Arc::new(api), config), tracker)
}

fn acme() -> FakeApi {
    FakeApi::new()
        .with_org("acme", 2, &["one", "two"])
        .with_files("acme/one", &[("docs/a.md", 10)])
        .with_files("acme/two", &[("examples/b.py", 10), ("examples/c.py", 10)])
}

#[tokio::test]
async fn test_organization_task_completes_with_summary() {
    let tmp = TempDir::new().unwrap();
    let runner = runner(acme(), &tmp);
    let progress = RecordingProgress::new();

    let task = runner
        .start_organization("acme", &progress, None)
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.task_type, "organization");
    assert_eq!(task.param_str("org"), Some("acme"));
    assert_eq!(task.progress, 100.0);
    let stages: Vec<&str> = task.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(stages, vec![STAGE_LISTING, STAGE_CRAWLING]);

    let result = task.result.unwrap();
    assert_eq!(result["repositories"], 2);
    assert_eq!(result["files"], 3);
    assert_eq!(result["failed_files"], 0);
    assert_eq!(
        result["cache_dir"],
        tmp.path().join("cache").display().to_string()
    );

    // The caller's sink saw the job progress too
    assert_eq!(progress.percents().last(), Some(&70.0));
}

#[tokio::test]
async fn test_repository_task_records_failure() {
    let tmp = TempDir::new().unwrap();
    let api = FakeApi::new()
        .with_files("acme/widgets", &[("docs/a.md", 10)])
        .failing_listing("acme/widgets", "");
    let runner = runner(api, &tmp);

    let task = runner
        .start_repository("https://github.com/acme/widgets", &NoopProgress, None)
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error_message().unwrap().contains("acme/widgets"));
    assert!(runner.tracker().list_resumable_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_repository_url_creates_no_task() {
    let tmp = TempDir::new().unwrap();
    let runner = runner(FakeApi::new(), &tmp);

    let result = runner
        .start_repository("not a url", &NoopProgress, None)
        .await;

    match result {
        Err(RunError::Fetch(FetchError::Github(GithubError::InvalidReference(_)))) => {}
        other => panic!("Expected invalid reference, got {other:?}"),
    }
    assert!(runner.tracker().list_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_job_cancels_its_task() {
    let tmp = TempDir::new().unwrap();
    let runner = runner(acme(), &tmp);
    let cancel = CancellationSignal::new();
    cancel.cancel();

    let task = runner
        .start_organization("acme", &NoopProgress, Some(&cancel))
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.cancelled_at.is_some());
}

#[tokio::test]
async fn test_cancel_during_last_batch_cancels_task() {
    let tmp = TempDir::new().unwrap();
    let cancel = CancellationSignal::shared();
    let api = FakeApi::new()
        .with_org("acme", 1, &["one"])
        .with_files("acme/one", &[("docs/a.md", 10), ("docs/guide/b.md", 10)])
        .cancel_on_listing(Arc::clone(&cancel));
    let runner = runner(api, &tmp);
    let progress = RecordingProgress::new();

    let task = runner
        .start_organization("acme", &progress, Some(cancel.as_ref()))
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.cancelled_at.is_some());
    assert!(task.result.is_none());
    assert!(progress
        .messages()
        .iter()
        .any(|m| m == CANCELLED_MESSAGE));
}

#[tokio::test]
async fn test_resumed_organization_task_keeps_stage_history() {
    let tmp = TempDir::new().unwrap();
    let runner = runner(acme(), &tmp);
    let tracker = runner.tracker();

    let mut params = serde_json::Map::new();
    params.insert("org".into(), "acme".into());
    let id = tracker
        .create_task("organization", params, "Fetch content from organization acme")
        .unwrap();
    tracker
        .update_task_progress(&id, 10.0, Some(STAGE_LISTING), None)
        .unwrap();
    tracker
        .update_task_progress(&id, 40.0, Some(STAGE_CRAWLING), None)
        .unwrap();

    let task = runner.resume(&id, &NoopProgress, None).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    let stages: Vec<&str> = task.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(stages, vec![STAGE_LISTING, STAGE_CRAWLING]);
}

#[tokio::test]
async fn test_resume_interrupted_task() {
    let tmp = TempDir::new().unwrap();
    let runner = runner(acme(), &tmp);
    let tracker = runner.tracker();

    let mut params = serde_json::Map::new();
    params.insert("repo_url".into(), "https://github.com/acme/one".into());
    let id = tracker
        .create_task("repository", params, "Fetch content from repository acme/one")
        .unwrap();
    tracker
        .update_task_progress(&id, 30.0, Some(STAGE_CRAWLING), None)
        .unwrap();
    assert_eq!(tracker.list_resumable_tasks().unwrap().len(), 1);

    let task = runner.resume(&id, &NoopProgress, None).await.unwrap();

    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result.unwrap()["files"], 1);
    assert!(tracker.list_resumable_tasks().unwrap().is_empty());
}

#[tokio::test]
async fn test_finished_task_cannot_be_resumed() {
    let tmp = TempDir::new().unwrap();
    let runner = runner(acme(), &tmp);
    let task = runner
        .start_repository("https://github.com/acme/one", &NoopProgress, None)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    match runner.resume(&task.id, &NoopProgress, None).await {
        Err(RunError::Task(TaskError::InvalidTransition {
            from: TaskStatus::Completed,
            ..
        })) => {}
        other => panic!("Expected invalid transition, got {other:?}"),
    }
    assert!(matches!(
        runner.resume("repository_19990101_000000", &NoopProgress, None).await,
        Err(RunError::Task(TaskError::NotFound(_)))
    ));
}
