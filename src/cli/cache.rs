//! Cache commands

use clap::{Args, Subcommand};
use serde_json::json;

use super::{Cli, CliError};

/// Cache subcommand
#[derive(Debug, Args)]
pub struct CacheCommand {
    #[command(subcommand)]
    action: CacheAction,
}

#[derive(Debug, Subcommand)]
enum CacheAction {
    /// Total size of cached files in megabytes
    Size,
    /// Delete every cached file
    Clear,
}

impl CacheCommand {
    /// Execute the cache command.
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let tracker = cli.tracker()?;
        let cache_dir = tracker.cache_dir().display().to_string();
        match self.action {
            CacheAction::Size => {
                let size_mb = tracker.get_cache_size()?;
                cli.emit(
                    &json!({ "cache_dir": cache_dir, "size_mb": size_mb }),
                    |_| println!("{cache_dir}: {size_mb:.2} MB"),
                )
            }
            CacheAction::Clear => {
                tracker.clear_cache()?;
                cli.emit(&json!({ "cache_dir": cache_dir, "cleared": true }), |_| {
                    println!("Cleared {cache_dir}")
                })
            }
        }
    }
}
