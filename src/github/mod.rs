//! GitHub API access
//!
//! - [`rate_limit`] - process-wide pacing and hourly quota
//! - [`client`] - authenticated HTTP client with retry policy
//! - [`types`] - wire types for contents, repository and organization endpoints
//! - [`url`] - repository URL resolution
//!
//! The crawler and orchestrator talk to GitHub through the [`RepositoryApi`]
//! trait so they can run against an in-memory source in tests.

use async_trait::async_trait;
use std::time::Duration;

pub mod client;
pub mod rate_limit;
pub mod types;
pub mod url;

pub use client::GithubClient;
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use types::{
    ContentEntry, DirectoryListing, EntryKind, OrganizationInfo, OwnerInfo, RepositoryInfo,
};
pub use url::parse_repository_url;

/// GitHub API errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum GithubError {
    /// Connection reset, timeout or protocol error
    #[error("network error: {0}")]
    Network(String),

    /// The API rate limit was hit and the reset is too far away to wait for
    #[error("GitHub API rate limit exceeded, try again in {:.1} minutes", wait.as_secs_f64() / 60.0)]
    RateLimitExceeded {
        /// Estimated time until the limit resets
        wait: Duration,
    },

    /// The local hourly budget is nearly used up
    #[error("GitHub API hourly budget nearly exhausted, wait {:.1} minutes", wait.as_secs_f64() / 60.0)]
    QuotaExhausted {
        /// Time left in the current hour window
        wait: Duration,
    },

    /// Non-success response that is not a rate limit
    #[error("GitHub API error: {status} - {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Message from the response body
        message: String,
    },

    /// Retry budget exhausted
    #[error("Maximum retries reached after {attempts} attempts: {last_error}")]
    MaxRetries {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: String,
    },

    /// Malformed repository URL
    #[error("invalid GitHub repository URL: {0}")]
    InvalidReference(String),

    /// Response body did not match the expected shape
    #[error("parse error: {0}")]
    Parse(String),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(String),
}

impl GithubError {
    /// Whether this error is a rate or quota limit rather than a fault.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            GithubError::RateLimitExceeded { .. } | GithubError::QuotaExhausted { .. }
        )
    }
}

/// Result type for GitHub operations
pub type GithubResult<T> = Result<T, GithubError>;

/// Repository-hosting operations used by the crawler and orchestrator
#[async_trait]
pub trait RepositoryApi: Send + Sync {
    /// Organization metadata (`orgs/{org}`)
    async fn organization(&self, org: &str) -> GithubResult<OrganizationInfo>;

    /// One page of an organization's repositories (1-based page number)
    async fn organization_repos(
        &self,
        org: &str,
        page: u32,
        per_page: u32,
    ) -> GithubResult<Vec<RepositoryInfo>>;

    /// Repository metadata (`repos/{owner}/{repo}`)
    async fn repository(&self, owner: &str, repo: &str) -> GithubResult<RepositoryInfo>;

    /// Contents of `path` at `git_ref`
    async fn contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> GithubResult<DirectoryListing>;

    /// Raw bytes behind a download URL
    async fn download(&self, url: &str) -> GithubResult<Vec<u8>>;
}
