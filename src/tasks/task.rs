//! Task record and status model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle state of a task
///
/// `Created -> InProgress -> {Completed | Cancelled | Failed}`; the last
/// three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Recorded, no progress yet
    #[default]
    Created,
    /// Running or interrupted while running
    InProgress,
    /// Finished successfully
    Completed,
    /// Stopped on request
    Cancelled,
    /// Finished with an error
    Failed,
}

impl TaskStatus {
    /// Whether no further transition is allowed.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Cancelled | TaskStatus::Failed
        )
    }

    /// Label used in metrics and listings.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finished stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name
    pub name: String,
    /// When the task moved past it
    pub completed_at: DateTime<Utc>,
}

/// Persisted job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique id, `{type}_{YYYYMMDD_HHMMSS}[_n]`
    pub id: String,
    /// Job type, e.g. `organization` or `repository`
    #[serde(rename = "type")]
    pub task_type: String,
    /// Job parameters needed to resume it
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Lifecycle state
    #[serde(default)]
    pub status: TaskStatus,
    /// Overall progress, 0-100
    #[serde(default)]
    pub progress: f64,
    /// Stage currently running
    #[serde(default)]
    pub current_stage: Option<String>,
    /// Progress within the current stage, 0-100
    #[serde(default)]
    pub stage_progress: f64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
    /// Start of the current stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_started_at: Option<DateTime<Utc>>,
    /// When the task completed or failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the task was cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Finished stages, oldest first
    #[serde(default)]
    pub stages: Vec<StageRecord>,
    /// Outcome payload; `{"error": ...}` for failed tasks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Task {
    pub(crate) fn new(
        id: String,
        task_type: &str,
        params: Map<String, Value>,
        description: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type: task_type.to_string(),
            params,
            description: description.to_string(),
            status: TaskStatus::Created,
            progress: 0.0,
            current_stage: None,
            stage_progress: 0.0,
            created_at: now,
            updated_at: now,
            stage_started_at: None,
            completed_at: None,
            cancelled_at: None,
            stages: Vec::new(),
            result: None,
        }
    }

    /// Whether a later process may pick this task up again.
    pub fn is_resumable(&self) -> bool {
        self.status == TaskStatus::InProgress
    }

    /// String parameter `key`, if present.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Error message of a failed task.
    pub fn error_message(&self) -> Option<&str> {
        self.result
            .as_ref()
            .and_then(|r| r.get("error"))
            .and_then(Value::as_str)
    }

    /// Close the current stage, if any, at `now`. A stage already in the
    /// history (a resumed job passing through it again) is not repeated.
    pub(crate) fn close_stage(&mut self, now: DateTime<Utc>) {
        if let Some(name) = self.current_stage.take() {
            if !self.stages.iter().any(|s| s.name == name) {
                self.stages.push(StageRecord {
                    name,
                    completed_at: now,
                });
            }
        }
    }
}

/// An in-progress task with a human-readable age
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResumableTask {
    /// The task
    #[serde(flatten)]
    pub task: Task,
    /// e.g. "50 minutes ago"
    pub updated_ago: String,
}

/// Render an elapsed time the way task listings show it.
///
/// Under a minute in seconds, under two hours in minutes, under two days in
/// hours, days beyond that.
pub fn humanize_elapsed(elapsed: chrono::Duration) -> String {
    let secs = elapsed.num_seconds().max(0);
    let (value, unit) = if secs < 60 {
        (secs, "second")
    } else if secs < 120 * 60 {
        (secs / 60, "minute")
    } else if secs < 48 * 3600 {
        (secs / 3600, "hour")
    } else {
        (secs / 86_400, "day")
    };
    let plural = if value == 1 { "" } else { "s" };
    format!("{value} {unit}{plural} ago")
}
