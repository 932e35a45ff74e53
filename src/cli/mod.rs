//! CLI command implementations

pub mod cache;
pub mod error;
pub mod fetch;
pub mod progress;
pub mod tasks;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::HarvestConfig;
use crate::github::{GithubClient, RateLimiter, RateLimiterConfig};
use crate::orchestrator::{FetchOrchestrator, TaskRunner};
use crate::tasks::TaskTracker;

pub use cache::CacheCommand;
pub use error::CliError;
pub use fetch::FetchCommand;
pub use progress::BarProgress;
pub use tasks::TasksCommand;

/// Crawl GitHub organizations and repositories for docs and examples
#[derive(Parser, Debug)]
#[command(name = "repo-harvester", version, about)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// JSON configuration file; missing fields keep their defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Data root: `cache/` and `tasks/` live under it
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// GitHub API token
    #[arg(long, global = true, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Override the API base URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "human")]
    pub output_format: OutputFormat,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch content from an organization or a repository
    Fetch(FetchCommand),

    /// Inspect, cancel and resume tasks
    Tasks(TasksCommand),

    /// Inspect or clear the file cache
    Cache(CacheCommand),
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

impl Cli {
    /// Configuration from the file, then command-line overrides.
    pub fn load_config(&self) -> Result<HarvestConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => HarvestConfig::load(path)?,
            None => HarvestConfig::default(),
        };
        if let Some(root) = &self.data_dir {
            config = config.with_data_root(root);
        }
        if let Some(token) = self.token.as_deref().filter(|t| !t.is_empty()) {
            config = config.with_token(token);
        }
        if let Some(url) = &self.api_url {
            config = config.with_api_base_url(url.as_str());
        }
        config.validate()?;
        Ok(config)
    }

    /// Task store for the configured data root.
    pub fn tracker(&self) -> Result<TaskTracker, CliError> {
        Ok(TaskTracker::from_config(&self.load_config()?))
    }

    /// Client, orchestrator and task store wired together.
    pub fn runner(&self) -> Result<TaskRunner, CliError> {
        let config = self.load_config()?;
        if config.token.is_none() {
            tracing::warn!("No GitHub token set; unauthenticated requests are limited to 60 per hour");
        }
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::from(&config)));
        let client = Arc::new(GithubClient::new(&config, limiter)?);
        let tracker = TaskTracker::from_config(&config);
        Ok(TaskRunner::new(FetchOrchestrator::new(client, config), tracker))
    }

    /// Print `value` as JSON or through `human`.
    pub(crate) fn emit<T: Serialize>(
        &self,
        value: &T,
        human: impl FnOnce(&T),
    ) -> Result<(), CliError> {
        match self.output_format {
            OutputFormat::Json => {
                let rendered = serde_json::to_string_pretty(value)
                    .map_err(|e| CliError::Output(e.to_string()))?;
                println!("{rendered}");
            }
            OutputFormat::Human => human(value),
        }
        Ok(())
    }
}
