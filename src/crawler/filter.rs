//! File and directory classification for crawls

use crate::config::HarvestConfig;

/// Decides which directories are walked and which files are collected.
///
/// A directory is relevant when its name contains one of the configured
/// keywords, compared case-insensitively ("Documentation" matches "doc").
/// Everything under a relevant directory is in a relevant context.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    relevant_folders: Vec<String>,
    ignored_dirs: Vec<String>,
    text_extensions: Vec<String>,
    max_file_size: u64,
}

impl ContentFilter {
    /// Build a filter from explicit lists.
    pub fn new(
        relevant_folders: &[String],
        ignored_dirs: &[String],
        text_extensions: &[String],
        max_file_size: u64,
    ) -> Self {
        let lower = |items: &[String]| -> Vec<String> {
            items
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        };
        Self {
            relevant_folders: lower(relevant_folders),
            ignored_dirs: lower(ignored_dirs),
            text_extensions: lower(text_extensions),
            max_file_size,
        }
    }

    /// Build a filter from configuration.
    pub fn from_config(config: &HarvestConfig) -> Self {
        Self::new(
            &config.relevant_folders,
            &config.ignored_dirs,
            &config.text_extensions,
            config.max_file_size_bytes(),
        )
    }

    /// Whether a single path segment names a relevant folder.
    pub fn is_relevant_segment(&self, segment: &str) -> bool {
        let segment = segment.to_lowercase();
        self.relevant_folders
            .iter()
            .any(|keyword| segment.contains(keyword.as_str()))
    }

    /// Whether any segment of `path` is relevant.
    pub fn in_relevant_context(&self, path: &str) -> bool {
        path.split('/')
            .filter(|s| !s.is_empty())
            .any(|segment| self.is_relevant_segment(segment))
    }

    /// Whether a directory is skipped regardless of relevance.
    pub fn is_ignored_dir(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.ignored_dirs.iter().any(|ignored| *ignored == name)
    }

    /// Whether `name` ends with an allowed text extension.
    pub fn is_text_file(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.text_extensions
            .iter()
            .any(|ext| name.ends_with(ext.as_str()))
    }

    /// Whether `size` bytes is within the size limit.
    pub fn within_size(&self, size: u64) -> bool {
        size <= self.max_file_size
    }

    /// Whether a directory entry named `name` under `parent` should be walked.
    pub fn should_descend(&self, parent: &str, name: &str) -> bool {
        !self.is_ignored_dir(name)
            && (self.in_relevant_context(parent) || self.is_relevant_segment(name))
    }

    /// Whether a file under `parent` should be collected.
    pub fn should_collect(&self, parent: &str, name: &str, size: u64) -> bool {
        self.in_relevant_context(parent) && self.is_text_file(name) && self.within_size(size)
    }

    /// Size limit in bytes.
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }
}
