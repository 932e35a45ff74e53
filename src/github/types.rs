//! Wire types for the GitHub REST endpoints the crawler uses

use serde::{Deserialize, Serialize};

use crate::RepositoryRef;

/// Kind of a contents-API entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Directory
    Dir,
    /// Symbolic link
    Symlink,
    /// Git submodule
    Submodule,
    /// Anything GitHub adds later
    #[serde(other)]
    Other,
}

/// One entry of a contents-API directory listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentEntry {
    /// File or directory name
    pub name: String,
    /// Path from the repository root
    pub path: String,
    /// Blob or tree SHA
    #[serde(default)]
    pub sha: String,
    /// Size in bytes (0 for directories)
    #[serde(default)]
    pub size: u64,
    /// Entry kind
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Raw download URL (files only)
    #[serde(default)]
    pub download_url: Option<String>,
    /// Browser URL
    #[serde(default)]
    pub html_url: Option<String>,
}

impl ContentEntry {
    /// Whether this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Whether this entry is a regular file.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Response of the contents API for a path
///
/// A directory path yields an array; a file path yields a single object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DirectoryListing {
    /// Directory contents
    Entries(Vec<ContentEntry>),
    /// The path named a file
    File(Box<ContentEntry>),
}

/// Organization metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationInfo {
    /// Organization login
    pub login: String,
    /// Number of public repositories
    #[serde(default)]
    pub public_repos: u64,
}

/// Repository owner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerInfo {
    /// Owner login
    pub login: String,
}

/// Repository metadata as returned by `repos/{owner}/{repo}` and org listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryInfo {
    /// Repository name
    pub name: String,
    /// Owner
    pub owner: OwnerInfo,
    /// Default branch
    #[serde(default)]
    pub default_branch: Option<String>,
}

impl RepositoryInfo {
    /// Resolve into a [`RepositoryRef`], using `fallback_branch` when the API
    /// omitted the default branch.
    pub fn into_ref(self, fallback_branch: &str) -> RepositoryRef {
        RepositoryRef::new(
            self.owner.login,
            self.name,
            self.default_branch
                .unwrap_or_else(|| fallback_branch.to_string()),
        )
    }
}
