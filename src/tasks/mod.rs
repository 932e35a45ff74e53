//! Persisted, resumable task tracking
//!
//! A task is the durable record of one job. The orchestrator's task runner
//! advances it through stages; front ends read the store to list, cancel and
//! resume tasks.

pub mod task;
pub mod tracker;

pub use task::{humanize_elapsed, ResumableTask, StageRecord, Task, TaskStatus};
pub use tracker::TaskTracker;

/// Task store errors
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// No record for the id
    #[error("task not found: {0}")]
    NotFound(String),

    /// The transition is not allowed from the current status
    #[error("task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Task id
        id: String,
        /// Current status
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },

    /// File system error
    #[error("I/O error: {0}")]
    Io(String),

    /// Record could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Record lock could not be taken
    #[error("lock error: {0}")]
    Lock(String),
}
