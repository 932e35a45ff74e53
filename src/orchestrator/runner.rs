//! Tracked fetch jobs
//!
//! [`TaskRunner`] wraps each orchestrator job in a persisted task: the job's
//! progress is written to the task store as it runs and the task is
//! finalized as completed, cancelled or failed. A task cancelled from another
//! process is noticed on the next progress write and stops the job at its
//! next checkpoint.

use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::{debug, error, info, warn};

use super::{FetchError, FetchOrchestrator, FetchOutcome, LISTING_BAND};
use crate::cancel::CancellationSignal;
use crate::github::parse_repository_url;
use crate::progress::ProgressSink;
use crate::tasks::{Task, TaskError, TaskStatus, TaskTracker};
use crate::FileRecord;

/// Task type of organization jobs
pub const ORGANIZATION_TASK: &str = "organization";
/// Task type of single-repository jobs
pub const REPOSITORY_TASK: &str = "repository";

/// Stage covering repository listing
pub const STAGE_LISTING: &str = "listing";
/// Stage covering directory crawling
pub const STAGE_CRAWLING: &str = "crawling";

/// Task runner errors
///
/// Job failures are not errors here: they are recorded on the task, which is
/// returned as failed.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Task store failure or rejected transition
    #[error(transparent)]
    Task(#[from] TaskError),

    /// The job could not be started
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The task record cannot be run
    #[error("task {id} cannot be run: {reason}")]
    Unrunnable {
        /// Task id
        id: String,
        /// What is wrong with the record
        reason: String,
    },
}

/// Runs orchestrator jobs as persisted tasks
#[derive(Debug, Clone)]
pub struct TaskRunner {
    orchestrator: FetchOrchestrator,
    tracker: TaskTracker,
}

impl TaskRunner {
    /// Create a runner.
    pub fn new(orchestrator: FetchOrchestrator, tracker: TaskTracker) -> Self {
        Self {
            orchestrator,
            tracker,
        }
    }

    /// Task store in use.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Start an organization job and run it to the end.
    pub async fn start_organization(
        &self,
        org: &str,
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationSignal>,
    ) -> Result<Task, RunError> {
        let mut params = Map::new();
        params.insert("org".to_string(), Value::String(org.to_string()));
        let id = self.tracker.create_task(
            ORGANIZATION_TASK,
            params,
            &format!("Fetch content from organization {org}"),
        )?;
        self.run(&id, progress, cancel).await
    }

    /// Start a single-repository job and run it to the end.
    ///
    /// A malformed URL is rejected before any task is recorded.
    pub async fn start_repository(
        &self,
        url: &str,
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationSignal>,
    ) -> Result<Task, RunError> {
        let (owner, name) = parse_repository_url(url).map_err(FetchError::from)?;
        let mut params = Map::new();
        params.insert("repo_url".to_string(), Value::String(url.to_string()));
        let id = self.tracker.create_task(
            REPOSITORY_TASK,
            params,
            &format!("Fetch content from repository {owner}/{name}"),
        )?;
        self.run(&id, progress, cancel).await
    }

    /// Run a created or interrupted task again from the start of its job.
    pub async fn resume(
        &self,
        id: &str,
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationSignal>,
    ) -> Result<Task, RunError> {
        let task = self
            .tracker
            .get_task(id)?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if task.status.is_terminal() {
            return Err(TaskError::InvalidTransition {
                id: task.id,
                from: task.status,
                to: TaskStatus::InProgress,
            }
            .into());
        }

        info!(task_id = %id, "Resuming task");
        self.run(id, progress, cancel).await
    }

    async fn run(
        &self,
        id: &str,
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationSignal>,
    ) -> Result<Task, RunError> {
        let task = self
            .tracker
            .get_task(id)?
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;

        let local = CancellationSignal::new();
        let cancel = cancel.unwrap_or(&local);

        let outcome = match task.task_type.as_str() {
            ORGANIZATION_TASK => {
                let org = required_param(&task, "org")?;
                let sink = TrackedProgress::new(&self.tracker, id, progress, cancel, LISTING_BAND.1);
                self.orchestrator
                    .fetch_content_for_org(org, &sink, Some(cancel))
                    .await
            }
            REPOSITORY_TASK => {
                let url = required_param(&task, "repo_url")?;
                let sink = TrackedProgress::new(&self.tracker, id, progress, cancel, 0.0);
                self.orchestrator
                    .fetch_content_for_repo_cancellable(url, &sink, Some(cancel))
                    .await
                    .map(|files| {
                        if cancel.is_cancelled() {
                            FetchOutcome::Cancelled
                        } else {
                            FetchOutcome::Completed(files)
                        }
                    })
            }
            other => {
                return Err(RunError::Unrunnable {
                    id: id.to_string(),
                    reason: format!("unknown task type '{other}'"),
                })
            }
        };

        self.finish(id, outcome)
    }

    fn finish(
        &self,
        id: &str,
        outcome: Result<FetchOutcome<Vec<FileRecord>>, FetchError>,
    ) -> Result<Task, RunError> {
        let finished = match outcome {
            Ok(FetchOutcome::Completed(files)) => {
                let result = self.summarize(&files);
                self.tracker.complete_task(id, true, Some(result))
            }
            Ok(FetchOutcome::Cancelled) => self.tracker.cancel_task(id),
            Err(e) => {
                error!(task_id = %id, "Task failed: {}", e);
                self.tracker.fail_task(id, &e.to_string())
            }
        };

        match finished {
            Ok(task) => Ok(task),
            // Cancelled from elsewhere while the job was finishing
            Err(TaskError::InvalidTransition {
                from: TaskStatus::Cancelled,
                ..
            }) => {
                warn!(task_id = %id, "Task was cancelled before it finished");
                Ok(self
                    .tracker
                    .get_task(id)?
                    .ok_or_else(|| TaskError::NotFound(id.to_string()))?)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn summarize(&self, files: &[FileRecord]) -> Value {
        let cached = files.iter().filter(|f| f.is_cached()).count();
        let repositories: HashSet<&str> = files.iter().map(|f| f.repo.as_str()).collect();
        json!({
            "repositories": repositories.len(),
            "files": files.len(),
            "cached_files": cached,
            "failed_files": files.len() - cached,
            "cache_dir": self.tracker.cache_dir().display().to_string(),
        })
    }
}

fn required_param<'t>(task: &'t Task, key: &str) -> Result<&'t str, RunError> {
    task.param_str(key).ok_or_else(|| RunError::Unrunnable {
        id: task.id.clone(),
        reason: format!("missing parameter '{key}'"),
    })
}

/// Forwards progress to the caller and into the task record.
///
/// Progress below `crawl_from` belongs to the listing stage, the rest to the
/// crawling stage.
struct TrackedProgress<'a> {
    tracker: &'a TaskTracker,
    id: &'a str,
    inner: &'a dyn ProgressSink,
    cancel: &'a CancellationSignal,
    crawl_from: f64,
}

impl<'a> TrackedProgress<'a> {
    fn new(
        tracker: &'a TaskTracker,
        id: &'a str,
        inner: &'a dyn ProgressSink,
        cancel: &'a CancellationSignal,
        crawl_from: f64,
    ) -> Self {
        Self {
            tracker,
            id,
            inner,
            cancel,
            crawl_from,
        }
    }

    fn stage(&self, percent: f64) -> (&'static str, f64) {
        if percent < self.crawl_from {
            (STAGE_LISTING, percent / self.crawl_from * 100.0)
        } else {
            let span = (100.0 - self.crawl_from).max(f64::EPSILON);
            (STAGE_CRAWLING, (percent - self.crawl_from) / span * 100.0)
        }
    }
}

impl ProgressSink for TrackedProgress<'_> {
    fn report(&self, percent: f64, message: Option<&str>) {
        self.inner.report(percent, message);
        if percent < 0.0 {
            return;
        }

        let (stage, stage_progress) = self.stage(percent);
        match self
            .tracker
            .update_task_progress(self.id, percent, Some(stage), Some(stage_progress))
        {
            Ok(_) => {}
            Err(TaskError::InvalidTransition {
                from: TaskStatus::Cancelled,
                ..
            }) => {
                if !self.cancel.is_cancelled() {
                    info!(task_id = %self.id, "Task cancelled externally, stopping");
                    self.cancel.cancel();
                }
            }
            Err(e) => debug!(task_id = %self.id, "Failed to record progress: {}", e),
        }
    }
}
