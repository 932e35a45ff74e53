//! Harvest configuration and backoff helpers
//!
//! [`HarvestConfig`] is the whole configuration surface consumed by the core:
//! API endpoint and retry budgets, rate limiter pacing, crawl filters, worker
//! pool sizes, and the cache and task store locations. Every field has a
//! default so a partial JSON file is enough to override a few values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default GitHub REST API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// Maximum number of attempts for metadata requests.
/// 5 attempts with exponential backoff ride out connection resets without
/// stalling a worker for more than about a minute.
pub const MAX_RETRIES: u32 = 5;

/// Maximum number of attempts for raw file downloads.
/// Large downloads fail more often than metadata calls, so they get a larger budget.
pub const DOWNLOAD_RETRIES: u32 = 8;

/// Upper bound for a single download backoff delay.
pub const MAX_DOWNLOAD_BACKOFF: Duration = Duration::from_secs(30);

/// Results per page when listing organization repositories (GitHub maximum).
pub const PAGE_SIZE: u32 = 100;

/// Hourly request budget for authenticated GitHub users.
pub const HOURLY_REQUEST_BUDGET: u64 = 5000;

const DEFAULT_RELEVANT_FOLDERS: &[&str] = &[
    "docs",
    "doc",
    "documentation",
    "examples",
    "example",
    "samples",
    "sample",
    "cookbook",
    "cookbooks",
    "tutorials",
    "tutorial",
    "guides",
    "guide",
    "notebooks",
    "demos",
    "demo",
];

const DEFAULT_IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "vendor",
    "build",
    "dist",
    "target",
    ".git",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".idea",
    ".vscode",
];

const DEFAULT_TEXT_EXTENSIONS: &[&str] = &[
    ".md", ".mdx", ".rst", ".txt", ".py", ".ipynb", ".js", ".jsx", ".ts", ".tsx", ".rs", ".go",
    ".java", ".kt", ".rb", ".php", ".c", ".h", ".cpp", ".hpp", ".cs", ".swift", ".scala", ".sh",
    ".yaml", ".yml", ".toml", ".json", ".html", ".css", ".sql", ".r", ".jl", ".lua",
];

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Configuration for the API client, crawler, orchestrator and task store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Base URL of the hosting API
    pub api_base_url: String,
    /// Bearer token sent with every API request
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Attempts for metadata requests
    pub max_retries: u32,
    /// Attempts for raw file downloads
    pub download_retries: u32,
    /// Per-request timeout; downloads use twice this value
    pub request_timeout_secs: u64,
    /// Unit of the exponential backoff (`base * 2^attempt`)
    pub backoff_base_ms: u64,
    /// Safety margin added to the reported rate-limit reset time
    pub rate_limit_buffer_secs: u64,
    /// Rate-limit waits longer than this escalate to an error instead of sleeping
    pub max_rate_limit_wait_secs: u64,
    /// Cap of a single in-call rate-limit sleep
    pub max_rate_limit_sleep_secs: u64,
    /// Minimum spacing between two requests
    pub min_request_interval_ms: u64,
    /// Spacing used once the remaining quota drops to `low_quota_threshold`
    pub low_quota_interval_ms: u64,
    /// Remaining-quota level that triggers the slower spacing
    pub low_quota_threshold: u64,
    /// Requests allowed per hour window
    pub hourly_request_budget: u64,
    /// Folder keywords that mark a subtree as worth extracting
    pub relevant_folders: Vec<String>,
    /// Directory names skipped regardless of relevance
    pub ignored_dirs: Vec<String>,
    /// File extensions (with leading dot) that are collected
    pub text_extensions: Vec<String>,
    /// Largest file collected, in megabytes
    pub max_file_size_mb: f64,
    /// Branch used when the repository's default branch cannot be resolved
    pub default_branch: String,
    /// Maximum recursion depth of a crawl
    pub max_depth: usize,
    /// Concurrent subdirectory crawls per directory
    pub directory_workers: usize,
    /// Concurrent repository crawls per batch
    pub repository_workers: usize,
    /// Repositories per batch when crawling an organization
    pub repository_batch_size: usize,
    /// Page size for organization listings
    pub page_size: u32,
    /// Root of the file cache
    pub cache_dir: PathBuf,
    /// Directory holding one record per task
    pub tasks_dir: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            token: None,
            max_retries: MAX_RETRIES,
            download_retries: DOWNLOAD_RETRIES,
            request_timeout_secs: 30,
            backoff_base_ms: 1000,
            rate_limit_buffer_secs: 5,
            max_rate_limit_wait_secs: 120,
            max_rate_limit_sleep_secs: 30,
            min_request_interval_ms: 1000,
            low_quota_interval_ms: 2000,
            low_quota_threshold: 100,
            hourly_request_budget: HOURLY_REQUEST_BUDGET,
            relevant_folders: owned(DEFAULT_RELEVANT_FOLDERS),
            ignored_dirs: owned(DEFAULT_IGNORED_DIRS),
            text_extensions: owned(DEFAULT_TEXT_EXTENSIONS),
            max_file_size_mb: 1.0,
            default_branch: "main".to_string(),
            max_depth: 10,
            directory_workers: 3,
            repository_workers: 3,
            repository_batch_size: 5,
            page_size: PAGE_SIZE,
            cache_dir: PathBuf::from("cache"),
            tasks_dir: PathBuf::from("tasks"),
        }
    }
}

impl HarvestConfig {
    /// Load a configuration file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the crawler and client cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries == 0 || self.download_retries == 0 {
            return Err(ConfigError::Invalid(
                "retry budgets must allow at least one attempt".to_string(),
            ));
        }
        if self.directory_workers == 0 || self.repository_workers == 0 {
            return Err(ConfigError::Invalid(
                "worker pools need at least one worker".to_string(),
            ));
        }
        if self.repository_batch_size == 0 || self.page_size == 0 {
            return Err(ConfigError::Invalid(
                "batch and page sizes must be positive".to_string(),
            ));
        }
        if self.max_file_size_mb.is_nan() || self.max_file_size_mb <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "max_file_size_mb must be positive, got {}",
                self.max_file_size_mb
            )));
        }
        Ok(())
    }

    /// Set the API token.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Point the client at another API base URL.
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Relocate the cache and task store under `root`.
    pub fn with_data_root(mut self, root: &Path) -> Self {
        self.cache_dir = root.join("cache");
        self.tasks_dir = root.join("tasks");
        self
    }

    /// Request timeout for metadata calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Request timeout for raw downloads.
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.saturating_mul(2))
    }

    /// Backoff unit.
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Largest collected file size in bytes.
    pub fn max_file_size_bytes(&self) -> u64 {
        (self.max_file_size_mb * 1024.0 * 1024.0) as u64
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("cannot read config {path:?}: {message}")]
    Io {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// The configuration file is not valid JSON for [`HarvestConfig`]
    #[error("invalid config file: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Backoff before metadata retry number `retry` (1 for the first retry):
/// `base * 2^retry + uniform(0, 0.1 * base)`.
pub fn calculate_backoff(retry: u32, base: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(retry));
    exp + base.mul_f64(0.1 * rand::random::<f64>())
}

/// Backoff before download retry number `retry`:
/// `min(30s, base * 2^retry + uniform(0, 2 * base))`.
pub fn calculate_download_backoff(retry: u32, base: Duration) -> Duration {
    let exp = base.saturating_mul(2u32.saturating_pow(retry));
    (exp + base.mul_f64(2.0 * rand::random::<f64>())).min(MAX_DOWNLOAD_BACKOFF)
}
