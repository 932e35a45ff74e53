//! Durable task store
//!
//! One JSON record per task in `tasks_dir`, named `{id}.json`. Every mutation
//! is a read-modify-write under an exclusive `fd-lock` on `{id}.lock`; the new
//! record is written to a temporary file, synced and renamed over the old one.
//! A task id is claimed by creating its lock file, which is removed once the
//! task is finished.

use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde_json::{json, Map, Value};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::task::{humanize_elapsed, ResumableTask, Task, TaskStatus};
use super::TaskError;
use crate::config::HarvestConfig;
use crate::metrics;

/// Task records larger than this are refused on load.
const MAX_TASK_FILE_SIZE: u64 = 16 * 1024 * 1024;

const RECORD_EXTENSION: &str = "json";
const LOCK_EXTENSION: &str = "lock";

/// Persisted task state machine and cache housekeeping
#[derive(Debug, Clone)]
pub struct TaskTracker {
    tasks_dir: PathBuf,
    cache_dir: PathBuf,
}

impl TaskTracker {
    /// Store tasks in `tasks_dir`; `cache_dir` is the crawl cache it reports on.
    pub fn new(tasks_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            tasks_dir: tasks_dir.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Tracker over the configured directories.
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(&config.tasks_dir, &config.cache_dir)
    }

    /// Task store directory.
    pub fn tasks_dir(&self) -> &Path {
        &self.tasks_dir
    }

    /// Cache directory.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Record a new task and return its id.
    ///
    /// Ids are `{type}_{YYYYMMDD_HHMMSS}`; a clash within the same second gets
    /// `_2`, `_3`, ... appended. An id is taken when its record exists or its
    /// lock file is held by another writer.
    pub fn create_task(
        &self,
        task_type: &str,
        params: Map<String, Value>,
        description: &str,
    ) -> Result<String, TaskError> {
        fs::create_dir_all(&self.tasks_dir).map_err(|e| TaskError::Io(e.to_string()))?;

        let now = Utc::now();
        let base = format!("{}_{}", task_type, now.format("%Y%m%d_%H%M%S"));
        let mut id = base.clone();
        let mut n = 1;
        let lock_file = loop {
            if !self.record_path(&id)?.exists() {
                if let Some(file) = self.claim_lock_file(&id)? {
                    break file;
                }
            }
            n += 1;
            id = format!("{base}_{n}");
        };

        let task = Task::new(id.clone(), task_type, params, description, now);
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| TaskError::Lock(format!("Failed to acquire write lock: {e}")))?;
        self.write_record(&task)?;

        info!(task_id = %id, task_type, "Task created");
        Ok(id)
    }

    /// Advance a task's progress.
    ///
    /// A `stage` different from the current one closes the current stage into
    /// the history, starts the new one and resets `stage_progress`. The same
    /// stage only updates the percentages. Overall progress never decreases.
    pub fn update_task_progress(
        &self,
        id: &str,
        progress: f64,
        stage: Option<&str>,
        stage_progress: Option<f64>,
    ) -> Result<Task, TaskError> {
        self.modify(id, |task, now| {
            if task.status.is_terminal() {
                return Err(TaskError::InvalidTransition {
                    id: task.id.clone(),
                    from: task.status,
                    to: TaskStatus::InProgress,
                });
            }
            task.status = TaskStatus::InProgress;

            if let Some(stage) = stage {
                if task.current_stage.as_deref() != Some(stage) {
                    task.close_stage(now);
                    task.current_stage = Some(stage.to_string());
                    task.stage_started_at = Some(now);
                    task.stage_progress = 0.0;
                    debug!(task_id = %task.id, stage, "Stage started");
                }
            }
            if let Some(stage_progress) = stage_progress {
                task.stage_progress = clamp_percent(stage_progress);
            }
            task.progress = task.progress.max(clamp_percent(progress));
            Ok(())
        })
    }

    /// Finish a task as completed (`success`) or failed.
    pub fn complete_task(
        &self,
        id: &str,
        success: bool,
        result: Option<Value>,
    ) -> Result<Task, TaskError> {
        let target = if success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        let task = self.modify(id, |task, now| {
            if task.status.is_terminal() {
                return Err(TaskError::InvalidTransition {
                    id: task.id.clone(),
                    from: task.status,
                    to: target,
                });
            }
            task.close_stage(now);
            task.status = target;
            task.completed_at = Some(now);
            if success {
                task.progress = 100.0;
            }
            task.result = result;
            Ok(())
        })?;

        metrics::record_task_finished(task.status.as_str());
        info!(task_id = %task.id, status = %task.status, "Task finished");
        Ok(task)
    }

    /// Finish a task as failed with `{"error": error}` as its result.
    pub fn fail_task(&self, id: &str, error: &str) -> Result<Task, TaskError> {
        self.complete_task(id, false, Some(json!({ "error": error })))
    }

    /// Cancel a task. The record is kept.
    ///
    /// Cancelling a cancelled task is a no-op; completed and failed tasks
    /// cannot be cancelled.
    pub fn cancel_task(&self, id: &str) -> Result<Task, TaskError> {
        let mut newly_cancelled = false;
        let task = self.modify(id, |task, now| {
            match task.status {
                TaskStatus::Cancelled => return Ok(()),
                TaskStatus::Completed | TaskStatus::Failed => {
                    return Err(TaskError::InvalidTransition {
                        id: task.id.clone(),
                        from: task.status,
                        to: TaskStatus::Cancelled,
                    })
                }
                TaskStatus::Created | TaskStatus::InProgress => {}
            }
            task.status = TaskStatus::Cancelled;
            task.cancelled_at = Some(now);
            newly_cancelled = true;
            Ok(())
        })?;

        if newly_cancelled {
            metrics::record_task_finished(TaskStatus::Cancelled.as_str());
            info!(task_id = %task.id, "Task cancelled");
        }
        Ok(task)
    }

    /// Load a task, `None` if there is no record for `id`.
    pub fn get_task(&self, id: &str) -> Result<Option<Task>, TaskError> {
        let path = match self.record_path(id) {
            Ok(path) => path,
            Err(TaskError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if !path.exists() {
            return Ok(None);
        }
        // Finished tasks have no lock file and no more writers
        let Some(lock_file) = self.existing_lock_file(id)? else {
            return self.read_record(&path).map(Some);
        };
        let lock = RwLock::new(lock_file);
        let _guard = lock
            .read()
            .map_err(|e| TaskError::Lock(format!("Failed to acquire read lock: {e}")))?;
        self.read_record(&path).map(Some)
    }

    /// All readable tasks, newest first.
    pub fn list_tasks(&self) -> Result<Vec<Task>, TaskError> {
        let entries = match fs::read_dir(&self.tasks_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(TaskError::Io(e.to_string())),
        };

        let mut tasks = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| TaskError::Io(e.to_string()))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match self.read_record(&path) {
                Ok(task) => tasks.push(task),
                Err(e) => warn!(path = %path.display(), "Skipping unreadable task record: {}", e),
            }
        }
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    /// In-progress tasks, most recently updated first.
    pub fn list_resumable_tasks(&self) -> Result<Vec<ResumableTask>, TaskError> {
        self.list_resumable_tasks_at(Utc::now())
    }

    /// [`list_resumable_tasks`](Self::list_resumable_tasks) with ages measured from `now`.
    pub fn list_resumable_tasks_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ResumableTask>, TaskError> {
        let mut tasks: Vec<Task> = self
            .list_tasks()?
            .into_iter()
            .filter(Task::is_resumable)
            .collect();
        tasks.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(tasks
            .into_iter()
            .map(|task| {
                let updated_ago = humanize_elapsed(now - task.updated_at);
                ResumableTask { task, updated_ago }
            })
            .collect())
    }

    /// Total size of cached files in megabytes.
    pub fn get_cache_size(&self) -> Result<f64, TaskError> {
        if !self.cache_dir.exists() {
            return Ok(0.0);
        }
        let mut bytes: u64 = 0;
        for entry in WalkDir::new(&self.cache_dir) {
            let entry = entry.map_err(|e| TaskError::Io(e.to_string()))?;
            if entry.file_type().is_file() {
                bytes += entry
                    .metadata()
                    .map_err(|e| TaskError::Io(e.to_string()))?
                    .len();
            }
        }
        Ok(bytes as f64 / (1024.0 * 1024.0))
    }

    /// Remove everything in the cache directory. A missing cache is fine.
    pub fn clear_cache(&self) -> Result<(), TaskError> {
        let entries = match fs::read_dir(&self.cache_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(TaskError::Io(e.to_string())),
        };
        for entry in entries {
            let entry = entry.map_err(|e| TaskError::Io(e.to_string()))?;
            let path = entry.path();
            let result = if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            result.map_err(|e| TaskError::Io(format!("{}: {e}", path.display())))?;
        }
        info!(cache_dir = %self.cache_dir.display(), "Cache cleared");
        Ok(())
    }

    /// Read-modify-write one task under its exclusive lock.
    fn modify<F>(&self, id: &str, mutate: F) -> Result<Task, TaskError>
    where
        F: FnOnce(&mut Task, DateTime<Utc>) -> Result<(), TaskError>,
    {
        let path = self.record_path(id)?;
        if !path.exists() {
            return Err(TaskError::NotFound(id.to_string()));
        }

        let lock_file = self.lock_file(id)?;
        let mut lock = RwLock::new(lock_file);
        let _guard = lock
            .write()
            .map_err(|e| TaskError::Lock(format!("Failed to acquire write lock: {e}")))?;

        let mut task = self.read_record(&path)?;
        let before = task.clone();
        let now = Utc::now();
        let outcome = mutate(&mut task, now);
        if outcome.is_ok() && task != before {
            task.updated_at = now;
            self.write_record(&task)?;
        }
        if task.status.is_terminal() {
            self.remove_lock_file(id);
        }
        outcome.map(|()| task)
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, TaskError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-'));
        if !valid {
            return Err(TaskError::NotFound(id.to_string()));
        }
        Ok(self.tasks_dir.join(format!("{id}.{RECORD_EXTENSION}")))
    }

    fn lock_path(&self, id: &str) -> PathBuf {
        self.tasks_dir.join(format!("{id}.{LOCK_EXTENSION}"))
    }

    fn lock_file(&self, id: &str) -> Result<fs::File, TaskError> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path(id))
            .map_err(|e| TaskError::Lock(format!("Failed to create lock file: {e}")))
    }

    /// Create the lock file of a new id; `None` when another writer has it.
    fn claim_lock_file(&self, id: &str) -> Result<Option<fs::File>, TaskError> {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(id))
        {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(TaskError::Lock(format!("Failed to create lock file: {e}"))),
        }
    }

    fn existing_lock_file(&self, id: &str) -> Result<Option<fs::File>, TaskError> {
        match OpenOptions::new().write(true).open(self.lock_path(id)) {
            Ok(file) => Ok(Some(file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(TaskError::Lock(format!("Failed to open lock file: {e}"))),
        }
    }

    fn remove_lock_file(&self, id: &str) {
        match fs::remove_file(self.lock_path(id)) {
            Ok(()) => debug!(task_id = %id, "Lock file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(task_id = %id, "Failed to remove lock file: {}", e),
        }
    }

    fn read_record(&self, path: &Path) -> Result<Task, TaskError> {
        let metadata = fs::metadata(path).map_err(|e| TaskError::Io(e.to_string()))?;
        if metadata.len() > MAX_TASK_FILE_SIZE {
            return Err(TaskError::Io(format!(
                "task record {} is {} bytes, limit is {}",
                path.display(),
                metadata.len(),
                MAX_TASK_FILE_SIZE
            )));
        }
        let contents = fs::read_to_string(path).map_err(|e| TaskError::Io(e.to_string()))?;
        serde_json::from_str(&contents).map_err(|e| TaskError::Serialization(e.to_string()))
    }

    /// Atomically replace the record of `task`. The caller holds the write lock.
    fn write_record(&self, task: &Task) -> Result<(), TaskError> {
        let path = self.record_path(&task.id)?;
        let json = serde_json::to_string_pretty(task)
            .map_err(|e| TaskError::Serialization(e.to_string()))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(&self.tasks_dir)
            .map_err(|e| TaskError::Io(format!("Failed to create temp file: {e}")))?;
        temp_file
            .write_all(json.as_bytes())
            .map_err(|e| TaskError::Io(format!("Failed to write temp file: {e}")))?;
        temp_file
            .flush()
            .map_err(|e| TaskError::Io(format!("Failed to flush temp file: {e}")))?;
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| TaskError::Io(format!("Failed to sync temp file: {e}")))?;
        temp_file
            .persist(&path)
            .map_err(|e| TaskError::Io(format!("Failed to persist temp file: {e}")))?;

        if let Ok(dir) = fs::File::open(&self.tasks_dir) {
            let _ = dir.sync_all();
        }

        debug!(
            task_id = %task.id,
            status = %task.status,
            progress = task.progress,
            "Task record saved"
        );
        Ok(())
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}
