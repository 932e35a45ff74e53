//! On-disk file cache
//!
//! Layout: `{cache_dir}/{owner}/{repo}/{path in repository}`. A failed fetch
//! leaves a `{name}.error` sidecar next to where the file would have been.

use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

/// Cache directory of one repository
#[derive(Debug, Clone)]
pub struct RepoCache {
    root: PathBuf,
}

impl RepoCache {
    /// Cache location for `owner/name` under `cache_dir`, without touching disk.
    pub fn new(cache_dir: &Path, owner: &str, name: &str) -> Self {
        Self {
            root: cache_dir.join(sanitize(owner)).join(sanitize(name)),
        }
    }

    /// Create the repository cache directory.
    pub async fn open(cache_dir: &Path, owner: &str, name: &str) -> io::Result<Self> {
        let cache = Self::new(cache_dir, owner, name);
        fs::create_dir_all(&cache.root).await?;
        Ok(cache)
    }

    /// Repository cache directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of a repository path.
    ///
    /// `.`, `..` and absolute components are dropped so nothing lands outside
    /// the repository directory.
    pub fn local_path(&self, repo_path: &str) -> PathBuf {
        let mut path = self.root.clone();
        for component in Path::new(repo_path).components() {
            if let Component::Normal(part) = component {
                path.push(part);
            }
        }
        path
    }

    /// Write fetched bytes and return where they went.
    pub async fn store(&self, repo_path: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = self.local_path(repo_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Record why a file could not be fetched.
    pub async fn store_error(&self, repo_path: &str, error: &str) -> io::Result<PathBuf> {
        let mut path = self.local_path(repo_path);
        let name = path
            .file_name()
            .map(|n| format!("{}.error", n.to_string_lossy()))
            .unwrap_or_else(|| "unnamed.error".to_string());
        path.set_file_name(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, format!("Error downloading: {error}")).await?;
        Ok(path)
    }
}

fn sanitize(segment: &str) -> String {
    segment.replace(['/', '\\'], "_").replace("..", "_")
}
