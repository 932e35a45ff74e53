//! CLI error types and conversions

use crate::config::ConfigError;
use crate::github::GithubError;
use crate::orchestrator::RunError;
use crate::tasks::TaskError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Client setup or API error
    #[error("github error: {0}")]
    Github(#[from] GithubError),

    /// Task store error
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Job could not run
    #[error("run error: {0}")]
    Run(#[from] RunError),

    /// The job ran and its task was recorded as failed
    #[error("task {id} failed: {message}")]
    TaskFailed {
        /// Task id
        id: String,
        /// Recorded error
        message: String,
    },

    /// Output could not be rendered
    #[error("output error: {0}")]
    Output(String),
}
