//! # Repo Harvester Library
//!
//! Crawls GitHub organizations and repositories and extracts the files that
//! document or demonstrate them (docs, examples, cookbooks, samples) into a
//! local cache. Long jobs are tracked in a persisted task store so they can be
//! listed, cancelled and resumed across process restarts.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use repo_harvester::config::HarvestConfig;
//! use repo_harvester::github::{GithubClient, RateLimiter, RateLimiterConfig};
//! use repo_harvester::orchestrator::FetchOrchestrator;
//! use repo_harvester::progress::NoopProgress;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarvestConfig::default().with_token("ghp_...");
//! let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::from(&config)));
//! let client = Arc::new(GithubClient::new(&config, limiter)?);
//!
//! let orchestrator = FetchOrchestrator::new(client, config);
//! let files = orchestrator
//!     .fetch_content_for_repo("https://github.com/rust-lang/rust-by-example", &NoopProgress)
//!     .await?;
//! println!("{} files cached", files.iter().filter(|f| f.is_cached()).count());
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`github`] - rate limiter, authenticated client with retry policy, wire types
//! - [`crawler`] - recursive, concurrency-bounded directory crawler and file cache
//! - [`orchestrator`] - organization and repository jobs, progress bands, task runner
//! - [`tasks`] - persisted, resumable task state machine
//! - [`progress`] / [`cancel`] - the progress sink and cancellation signal shared with callers
//! - [`config`] - configuration surface and backoff helpers

#![warn(missing_docs)]
#![warn(clippy::all)]

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Cooperative cancellation signal
pub mod cancel;

/// CLI command implementations
pub mod cli;

/// Configuration and backoff helpers
pub mod config;

/// Repository directory crawler
pub mod crawler;

/// GitHub API access
pub mod github;

/// Metrics instrumentation
pub mod metrics;

/// Organization and repository fetch jobs
pub mod orchestrator;

/// Progress reporting contract
pub mod progress;

/// Persisted task tracking
pub mod tasks;

pub use cancel::{CancellationSignal, SharedCancellation};
pub use config::HarvestConfig;
pub use github::{GithubClient, GithubError, RateLimiter};
pub use progress::ProgressSink;

/// A resolved repository
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryRef {
    owner: String,
    name: String,
    default_branch: String,
}

impl RepositoryRef {
    /// Create a reference from its parts.
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        default_branch: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            default_branch: default_branch.into(),
        }
    }

    /// Resolve `https://github.com/{owner}/{repo}[.git]`, using
    /// `default_branch` until the real default branch is known.
    pub fn from_url(url: &str, default_branch: &str) -> Result<Self, GithubError> {
        let (owner, name) = github::parse_repository_url(url)?;
        Ok(Self::new(owner, name, default_branch))
    }

    /// Owner login
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default branch
    pub fn default_branch(&self) -> &str {
        &self.default_branch
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

impl std::fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.owner, self.name, self.default_branch)
    }
}

/// Where a collected file ended up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileOutcome {
    /// Bytes were written to the cache
    Cached {
        /// Path of the cached copy
        local_path: PathBuf,
    },
    /// The fetch failed and the reason was recorded
    Failed {
        /// Error message
        error: String,
    },
}

/// One file selected by a crawl
///
/// Every selected file produces a record, cached or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// File name
    pub name: String,
    /// Path from the repository root
    pub path: String,
    /// Blob SHA
    pub sha: String,
    /// Size reported by the listing
    pub size_bytes: u64,
    /// URL the bytes were fetched from
    pub source_url: String,
    /// `owner/name` of the repository
    pub repo: String,
    /// Branch crawled
    pub branch: String,
    /// Cached path or error
    #[serde(flatten)]
    pub outcome: FileOutcome,
}

impl FileRecord {
    /// Whether the file is in the cache.
    pub fn is_cached(&self) -> bool {
        matches!(self.outcome, FileOutcome::Cached { .. })
    }

    /// Path of the cached copy, if any.
    pub fn local_path(&self) -> Option<&std::path::Path> {
        match &self.outcome {
            FileOutcome::Cached { local_path } => Some(local_path),
            FileOutcome::Failed { .. } => None,
        }
    }

    /// Recorded error, if any.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            FileOutcome::Failed { error } => Some(error),
            FileOutcome::Cached { .. } => None,
        }
    }
}
