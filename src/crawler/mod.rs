//! Repository directory crawler
//!
//! [`DirectoryCrawler`] walks a repository through the contents API, selects
//! files with [`ContentFilter`] and writes them to a [`RepoCache`]. Sibling
//! subdirectories are crawled concurrently, at most `directory_workers` at a
//! time per directory. A file that cannot be fetched becomes a failed
//! [`FileRecord`]; a subdirectory that cannot be listed contributes nothing.
//! Only a failure to list the crawl root is an error.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cancel::CancellationSignal;
use crate::config::HarvestConfig;
use crate::github::{ContentEntry, DirectoryListing, GithubError, RepositoryApi};
use crate::progress::ProgressSink;
use crate::{metrics, FileOutcome, FileRecord, RepositoryRef};

pub mod cache;
pub mod filter;

pub use cache::RepoCache;
pub use filter::ContentFilter;

/// Progress milestones reported while crawling a repository root
const PROGRESS_STARTED: f64 = 15.0;
const PROGRESS_ROOT_LISTED: f64 = 20.0;
const PROGRESS_ROOT_FILES_DONE: f64 = 30.0;
const PROGRESS_SUBTREES_DONE: f64 = 80.0;

/// Crawl errors
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    /// The crawl root could not be listed
    #[error("cannot list {repo}/{path}: {source}")]
    Listing {
        /// `owner/name`
        repo: String,
        /// Path that failed
        path: String,
        /// API error
        source: GithubError,
    },

    /// The repository cache directory could not be created
    #[error("cannot create cache directory {path:?}: {source}")]
    Cache {
        /// Directory that failed
        path: PathBuf,
        /// I/O error
        source: std::io::Error,
    },
}

/// Why a single file could not be fetched
#[derive(Debug, thiserror::Error)]
pub enum FileFetchError {
    /// API or download failure
    #[error(transparent)]
    Github(#[from] GithubError),

    /// Cache write failure
    #[error("cache write failed: {0}")]
    Cache(#[from] std::io::Error),

    /// Neither the listing nor the file metadata had a download URL
    #[error("no download URL for {0}")]
    MissingDownloadUrl(String),
}

/// One crawl in progress
struct CrawlTarget<'a> {
    owner: String,
    name: String,
    branch: String,
    cache: RepoCache,
    cancel: Option<&'a CancellationSignal>,
}

impl CrawlTarget<'_> {
    fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    fn is_cancelled(&self) -> bool {
        crate::cancel::is_cancelled(self.cancel)
    }
}

/// Recursive, concurrency-bounded repository crawler
#[derive(Clone)]
pub struct DirectoryCrawler {
    api: Arc<dyn RepositoryApi>,
    filter: ContentFilter,
    cache_dir: PathBuf,
    fallback_branch: String,
    max_depth: usize,
    workers: usize,
}

impl DirectoryCrawler {
    /// Create a crawler using `api` and the crawl settings of `config`.
    pub fn new(api: Arc<dyn RepositoryApi>, config: &HarvestConfig) -> Self {
        Self {
            api,
            filter: ContentFilter::from_config(config),
            cache_dir: config.cache_dir.clone(),
            fallback_branch: config.default_branch.clone(),
            max_depth: config.max_depth,
            workers: config.directory_workers.max(1),
        }
    }

    /// Default branch of `owner/name`, or the configured fallback when the
    /// API cannot tell.
    pub async fn resolve_branch(&self, owner: &str, name: &str) -> String {
        match self.api.repository(owner, name).await {
            Ok(info) => info
                .default_branch
                .filter(|b| !b.is_empty())
                .unwrap_or_else(|| self.fallback_branch.clone()),
            Err(e) => {
                warn!(
                    repo = %format!("{owner}/{name}"),
                    fallback = %self.fallback_branch,
                    "Cannot resolve default branch: {}", e
                );
                self.fallback_branch.clone()
            }
        }
    }

    /// Crawl a resolved repository from its root on its default branch.
    pub async fn crawl_repository(
        &self,
        repo: &RepositoryRef,
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationSignal>,
    ) -> Result<Vec<FileRecord>, CrawlError> {
        self.crawl(
            repo.owner(),
            repo.name(),
            "",
            Some(repo.default_branch()),
            progress,
            cancel,
        )
        .await
    }

    /// Crawl `owner/name` starting at `root_path`.
    ///
    /// Without a `branch` the repository's default branch is looked up first.
    /// Once `cancel` is set no further directories are listed; files already
    /// selected are still returned.
    pub async fn crawl(
        &self,
        owner: &str,
        name: &str,
        root_path: &str,
        branch: Option<&str>,
        progress: &dyn ProgressSink,
        cancel: Option<&CancellationSignal>,
    ) -> Result<Vec<FileRecord>, CrawlError> {
        let branch = match branch {
            Some(branch) => branch.to_string(),
            None => self.resolve_branch(owner, name).await,
        };
        let root_path = root_path.trim_matches('/');
        info!(
            repo = %format!("{owner}/{name}"),
            branch = %branch,
            "Fetching relevant content"
        );

        let cache_path = RepoCache::new(&self.cache_dir, owner, name).root().to_path_buf();
        let cache = RepoCache::open(&self.cache_dir, owner, name)
            .await
            .map_err(|source| CrawlError::Cache {
                path: cache_path,
                source,
            })?;
        let target = CrawlTarget {
            owner: owner.to_string(),
            name: name.to_string(),
            branch,
            cache,
            cancel,
        };

        progress.report(PROGRESS_STARTED, None);

        let listing = self
            .api
            .contents(owner, name, root_path, Some(&target.branch))
            .await
            .map_err(|source| CrawlError::Listing {
                repo: target.full_name(),
                path: root_path.to_string(),
                source,
            })?;
        let entries = match listing {
            DirectoryListing::Entries(entries) => entries,
            DirectoryListing::File(_) => {
                warn!(path = root_path, "Expected directory content but got a file");
                return Ok(Vec::new());
            }
        };

        progress.report(PROGRESS_ROOT_LISTED, None);
        let (mut files, subdirs) = self.process_entries(&target, root_path, entries).await;
        progress.report(PROGRESS_ROOT_FILES_DONE, None);

        files.extend(self.crawl_subdirs(&target, subdirs, 1).await);
        progress.report(PROGRESS_SUBTREES_DONE, None);

        let failed = files.iter().filter(|f| !f.is_cached()).count();
        info!(
            repo = %target.full_name(),
            files = files.len(),
            failed,
            "Crawl finished"
        );
        Ok(files)
    }

    /// List and process one non-root directory at `depth` below the root.
    fn walk<'a>(
        &'a self,
        target: &'a CrawlTarget<'a>,
        path: String,
        depth: usize,
    ) -> BoxFuture<'a, Vec<FileRecord>> {
        async move {
            if target.is_cancelled() {
                debug!(path = %path, "Crawl cancelled, skipping directory");
                return Vec::new();
            }

            let listing = match self
                .api
                .contents(&target.owner, &target.name, &path, Some(&target.branch))
                .await
            {
                Ok(DirectoryListing::Entries(entries)) => entries,
                Ok(DirectoryListing::File(_)) => {
                    warn!(path = %path, "Expected directory content but got a file");
                    return Vec::new();
                }
                Err(e) => {
                    error!(repo = %target.full_name(), "Error fetching directory {}: {}", path, e);
                    return Vec::new();
                }
            };

            let (mut files, subdirs) = self.process_entries(target, &path, listing).await;
            files.extend(self.crawl_subdirs(target, subdirs, depth + 1).await);
            files
        }
        .boxed()
    }

    /// Crawl `subdirs` (all at `depth`) with bounded concurrency.
    async fn crawl_subdirs<'a>(
        &'a self,
        target: &'a CrawlTarget<'a>,
        subdirs: Vec<String>,
        depth: usize,
    ) -> Vec<FileRecord> {
        if subdirs.is_empty() {
            return Vec::new();
        }
        if depth > self.max_depth {
            warn!(
                repo = %target.full_name(),
                skipped = subdirs.len(),
                max_depth = self.max_depth,
                "Maximum crawl depth reached"
            );
            return Vec::new();
        }

        stream::iter(subdirs)
            .map(move |path| self.walk(target, path, depth))
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Fetch the qualifying files of a directory and return them with the
    /// subdirectories worth walking.
    async fn process_entries(
        &self,
        target: &CrawlTarget<'_>,
        path: &str,
        entries: Vec<ContentEntry>,
    ) -> (Vec<FileRecord>, Vec<String>) {
        let mut subdirs = Vec::new();
        let mut selected = Vec::new();

        for entry in entries {
            if entry.is_dir() {
                if self.filter.should_descend(path, &entry.name) {
                    subdirs.push(entry.path);
                } else {
                    debug!(path = %entry.path, "Skipping directory");
                }
            } else if entry.is_file() && self.filter.should_collect(path, &entry.name, entry.size) {
                selected.push(entry);
            }
        }

        let mut files = Vec::with_capacity(selected.len());
        for entry in selected {
            files.push(self.fetch_file(target, entry).await);
        }
        (files, subdirs)
    }

    /// Download one file into the cache. Never fails: errors are recorded.
    async fn fetch_file(&self, target: &CrawlTarget<'_>, entry: ContentEntry) -> FileRecord {
        let failure = match self.download_entry(target, &entry).await {
            Ok((url, local_path)) => {
                metrics::record_file_cached();
                debug!(path = %entry.path, "Cached file");
                return self.record(target, entry, url, FileOutcome::Cached { local_path });
            }
            Err(e) => e,
        };

        let message = failure.to_string();
        error!(repo = %target.full_name(), "Error processing file {}: {}", entry.path, message);
        metrics::record_file_failed();
        if let Err(e) = target.cache.store_error(&entry.path, &message).await {
            debug!(path = %entry.path, "Cannot write error marker: {}", e);
        }

        let url = entry
            .download_url
            .clone()
            .or_else(|| entry.html_url.clone())
            .unwrap_or_default();
        self.record(target, entry, url, FileOutcome::Failed { error: message })
    }

    async fn download_entry(
        &self,
        target: &CrawlTarget<'_>,
        entry: &ContentEntry,
    ) -> Result<(String, PathBuf), FileFetchError> {
        let url = match &entry.download_url {
            Some(url) => url.clone(),
            None => self.lookup_download_url(target, &entry.path).await?,
        };
        let bytes = self.api.download(&url).await?;
        let local_path = target.cache.store(&entry.path, &bytes).await?;
        Ok((url, local_path))
    }

    /// Download URL from the file's own contents metadata.
    async fn lookup_download_url(
        &self,
        target: &CrawlTarget<'_>,
        path: &str,
    ) -> Result<String, FileFetchError> {
        let listing = self
            .api
            .contents(&target.owner, &target.name, path, Some(&target.branch))
            .await?;
        match listing {
            DirectoryListing::File(entry) => entry
                .download_url
                .ok_or_else(|| FileFetchError::MissingDownloadUrl(path.to_string())),
            DirectoryListing::Entries(_) => {
                Err(FileFetchError::MissingDownloadUrl(path.to_string()))
            }
        }
    }

    fn record(
        &self,
        target: &CrawlTarget<'_>,
        entry: ContentEntry,
        source_url: String,
        outcome: FileOutcome,
    ) -> FileRecord {
        FileRecord {
            name: entry.name,
            path: entry.path,
            sha: entry.sha,
            size_bytes: entry.size,
            source_url,
            repo: target.full_name(),
            branch: target.branch.clone(),
            outcome,
        }
    }
}

impl std::fmt::Debug for DirectoryCrawler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryCrawler")
            .field("filter", &self.filter)
            .field("cache_dir", &self.cache_dir)
            .field("max_depth", &self.max_depth)
            .field("workers", &self.workers)
            .finish()
    }
}
