//! Organization and repository fetch jobs
//!
//! [`FetchOrchestrator`] composes the API client and the [`DirectoryCrawler`]:
//!
//! - organization listing, page by page, with cancellation checked before
//!   every page
//! - organization content: repositories are crawled in batches, each batch
//!   through a small worker pool, with cancellation checked before every batch
//!   and once more after the last one
//! - single repository content, with milestone progress
//!
//! Organization content progress is reported in bands: 0-20% listing,
//! 20-70% crawling. The rest belongs to whatever consumes the files.
//! A repository that fails inside a batch contributes no files; a listing
//! failure fails the whole job.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cancel::{self, CancellationSignal};
use crate::config::HarvestConfig;
use crate::crawler::{CrawlError, DirectoryCrawler};
use crate::github::{parse_repository_url, GithubError, RepositoryApi};
use crate::progress::{NoopProgress, ProgressSink, ScaledProgress};
use crate::{FileRecord, RepositoryRef};

pub mod runner;

pub use runner::{RunError, TaskRunner};

/// Band of the organization job spent listing repositories
pub const LISTING_BAND: (f64, f64) = (0.0, 20.0);
/// Band of the organization job spent crawling repositories
pub const CRAWLING_BAND: (f64, f64) = (20.0, 70.0);

const REPO_STARTED: f64 = 10.0;
const REPO_CRAWLED: f64 = 90.0;
const REPO_DONE: f64 = 100.0;

/// Progress message reported when a job stops on request
pub const CANCELLED_MESSAGE: &str = "Operation cancelled";

/// Fetch job errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Listing or resolution failed
    #[error(transparent)]
    Github(#[from] GithubError),

    /// The repository root could not be crawled
    #[error(transparent)]
    Crawl(#[from] CrawlError),
}

/// Result of a job that may be cancelled
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    /// Ran to the end
    Completed(T),
    /// Stopped at a checkpoint because cancellation was requested
    Cancelled,
}

impl<T> FetchOutcome<T> {
    /// Whether the job was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchOutcome::Cancelled)
    }

    /// The value of a completed job.
    pub fn completed(self) -> Option<T> {
        match self {
            FetchOutcome::Completed(value) => Some(value),
            FetchOutcome::Cancelled => None,
        }
    }
}

/// What to fetch for a single-repository job
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryTarget {
    /// `https://github.com/{owner}/{repo}`; the default branch is looked up
    Url(String),
    /// Already resolved
    Resolved(RepositoryRef),
}

impl From<&str> for RepositoryTarget {
    fn from(url: &str) -> Self {
        RepositoryTarget::Url(url.to_string())
    }
}

impl From<String> for RepositoryTarget {
    fn from(url: String) -> Self {
        RepositoryTarget::Url(url)
    }
}

impl From<RepositoryRef> for RepositoryTarget {
    fn from(repo: RepositoryRef) -> Self {
        RepositoryTarget::Resolved(repo)
    }
}

/// Drives organization and repository jobs
#[derive(Clone)]
pub struct FetchOrchestrator {
    api: Arc<dyn RepositoryApi>,
    crawler: DirectoryCrawler,
    config: HarvestConfig,
}

impl FetchOrchestrator {
    /// Create an orchestrator over `api`.
    pub fn new(api: Arc<dyn RepositoryApi>, config: HarvestConfig) -> Self {
        let crawler = DirectoryCrawler::new(Arc::clone(&api), &config);
        Self {
            api,
            crawler,
            config,
        }
    }

    /// List every repository of `org`.
    ///
    /// Reports `Found N repositories in {org}` at 0%, then
    /// `Fetched k/N repositories` after each page.
    pub async fn fetch_organization(
        &self,
        org: &str,
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationSignal>,
    ) -> Result<FetchOutcome<Vec<RepositoryRef>>, FetchError> {
        info!(org, "Fetching repositories for organization");

        let info = match self.api.organization(org).await {
            Ok(info) => info,
            Err(e) => {
                error!(org, "Failed to get organization info: {}", e);
                progress.report(0.0, Some(&format!("Error: {e}")));
                return Err(e.into());
            }
        };
        let total = info.public_repos;
        progress.report(0.0, Some(&format!("Found {total} repositories in {org}")));

        let per_page = self.config.page_size;
        let percent = |fetched: usize| (fetched as f64 / total.max(1) as f64 * 100.0).min(100.0);
        let mut repos = Vec::new();
        let mut page = 1;

        loop {
            if cancel::is_cancelled(cancel) {
                info!(org, fetched = repos.len(), "Repository listing cancelled");
                progress.report(percent(repos.len()), Some(CANCELLED_MESSAGE));
                return Ok(FetchOutcome::Cancelled);
            }

            let batch = match self.api.organization_repos(org, page, per_page).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(org, page, "Failed to fetch repositories: {}", e);
                    progress.report(percent(repos.len()), Some(&format!("Error: {e}")));
                    return Err(e.into());
                }
            };
            if batch.is_empty() {
                break;
            }

            let last_page = batch.len() < per_page as usize;
            repos.extend(
                batch
                    .into_iter()
                    .map(|repo| repo.into_ref(&self.config.default_branch)),
            );
            progress.report(
                percent(repos.len()),
                Some(&format!("Fetched {}/{} repositories", repos.len(), total)),
            );

            if last_page {
                break;
            }
            page += 1;
        }

        info!(org, count = repos.len(), "Found repositories");
        Ok(FetchOutcome::Completed(repos))
    }

    /// Resolve a repository URL through the API.
    pub async fn fetch_single_repository(&self, url: &str) -> Result<RepositoryRef, FetchError> {
        let (owner, name) = parse_repository_url(url)?;
        info!(repo = %format!("{owner}/{name}"), "Fetching repository");
        let info = self.api.repository(&owner, &name).await?;
        Ok(info.into_ref(&self.config.default_branch))
    }

    /// Crawl every repository of `org`.
    pub async fn fetch_content_for_org(
        &self,
        org: &str,
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationSignal>,
    ) -> Result<FetchOutcome<Vec<FileRecord>>, FetchError> {
        let listing_band = ScaledProgress::new(progress, LISTING_BAND.0, LISTING_BAND.1);
        let repos = match self.fetch_organization(org, &listing_band, cancel).await? {
            FetchOutcome::Completed(repos) => repos,
            FetchOutcome::Cancelled => return Ok(FetchOutcome::Cancelled),
        };

        if repos.is_empty() {
            warn!(org, "No repositories found for organization");
            progress.report(CRAWLING_BAND.1, Some("No repositories found"));
            return Ok(FetchOutcome::Completed(Vec::new()));
        }

        progress.report(
            CRAWLING_BAND.0,
            Some(&format!("Found {} repositories in {}", repos.len(), org)),
        );
        Ok(self.crawl_repositories(&repos, progress, cancel).await)
    }

    /// Crawl `repos` in batches, reporting within the crawling band.
    ///
    /// Per-repository failures are logged and contribute no files.
    pub async fn crawl_repositories(
        &self,
        repos: &[RepositoryRef],
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationSignal>,
    ) -> FetchOutcome<Vec<FileRecord>> {
        let total = repos.len();
        if total == 0 {
            progress.report(CRAWLING_BAND.1, Some("No repositories found"));
            return FetchOutcome::Completed(Vec::new());
        }

        let batch_size = self.config.repository_batch_size.clamp(1, total);
        let batch_count = total.div_ceil(batch_size);
        let (start, end) = CRAWLING_BAND;
        let band = |done: usize| start + (end - start) * done as f64 / total as f64;
        let cancelled = |done: usize| -> FetchOutcome<Vec<FileRecord>> {
            info!(done, total, "Repository crawl cancelled");
            progress.report(band(done), Some(CANCELLED_MESSAGE));
            FetchOutcome::Cancelled
        };
        let mut files = Vec::new();
        let mut done = 0;

        for (index, batch) in repos.chunks(batch_size).enumerate() {
            if cancel::is_cancelled(cancel) {
                return cancelled(done);
            }

            debug!(
                batch = index + 1,
                batches = batch_count,
                repos = ?batch.iter().map(RepositoryRef::full_name).collect::<Vec<_>>(),
                "Processing batch"
            );

            let batch_files: Vec<FileRecord> = stream::iter(batch)
                .map(move |repo| self.crawl_one(repo, cancel))
                .buffer_unordered(self.config.repository_workers.max(1))
                .collect::<Vec<_>>()
                .await
                .into_iter()
                .flatten()
                .collect();

            debug!(
                batch = index + 1,
                files = batch_files.len(),
                "Batch complete"
            );
            files.extend(batch_files);
            done += batch.len();

            progress.report(
                band(done),
                Some(&format!("Processed {done}/{total} repositories")),
            );
        }

        // Crawls stop listing once cancelled, so the last batch may be partial
        if cancel::is_cancelled(cancel) {
            return cancelled(done);
        }

        info!(
            repositories = total,
            files = files.len(),
            "Fetched content from repositories"
        );
        progress.report(
            end,
            Some(&format!(
                "Fetched {} files from {} repositories",
                files.len(),
                total
            )),
        );
        FetchOutcome::Completed(files)
    }

    async fn crawl_one(
        &self,
        repo: &RepositoryRef,
        cancel: Option<&CancellationSignal>,
    ) -> Vec<FileRecord> {
        debug!(repo = %repo, "Processing repository");
        match self.crawler.crawl_repository(repo, &NoopProgress, cancel).await {
            Ok(files) => {
                debug!(repo = %repo.full_name(), files = files.len(), "Repository crawled");
                files
            }
            Err(e) => {
                error!(repo = %repo.full_name(), "Error processing repository: {}", e);
                Vec::new()
            }
        }
    }

    /// Crawl one repository.
    ///
    /// Milestones: 10% on start, the crawler's 15/20/30/80, 90% when the crawl
    /// returns and 100% at the end. Failures report `-1` with the message.
    pub async fn fetch_content_for_repo(
        &self,
        target: impl Into<RepositoryTarget>,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<FileRecord>, FetchError> {
        self.fetch_content_for_repo_cancellable(target, progress, None)
            .await
    }

    /// [`fetch_content_for_repo`](Self::fetch_content_for_repo) that stops
    /// listing directories once `cancel` is set.
    pub async fn fetch_content_for_repo_cancellable(
        &self,
        target: impl Into<RepositoryTarget>,
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationSignal>,
    ) -> Result<Vec<FileRecord>, FetchError> {
        let result = self.crawl_target(target.into(), progress, cancel).await;
        if let Err(e) = &result {
            error!("Failed to fetch repository content: {}", e);
            progress.error(&e.to_string());
        }
        result
    }

    async fn crawl_target(
        &self,
        target: RepositoryTarget,
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationSignal>,
    ) -> Result<Vec<FileRecord>, FetchError> {
        let (owner, name, branch) = match target {
            RepositoryTarget::Url(url) => {
                let (owner, name) = parse_repository_url(&url)?;
                (owner, name, None)
            }
            RepositoryTarget::Resolved(repo) => (
                repo.owner().to_string(),
                repo.name().to_string(),
                Some(repo.default_branch().to_string()),
            ),
        };

        info!(repo = %format!("{owner}/{name}"), "Fetching content");
        progress.report(REPO_STARTED, None);

        let files = self
            .crawler
            .crawl(&owner, &name, "", branch.as_deref(), progress, cancel)
            .await?;
        progress.report(REPO_CRAWLED, None);

        info!(
            repo = %format!("{owner}/{name}"),
            files = files.len(),
            "Fetched relevant files"
        );
        progress.report(REPO_DONE, None);
        Ok(files)
    }
}

impl std::fmt::Debug for FetchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOrchestrator")
            .field("crawler", &self.crawler)
            .field("config", &self.config)
            .finish()
    }
}
