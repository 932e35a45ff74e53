//! Fetch command implementation

use clap::{Args, Subcommand};
use tracing::info;

use super::{BarProgress, Cli, CliError, OutputFormat};
use crate::cancel::SharedCancellation;
use crate::tasks::{Task, TaskStatus};

/// Fetch subcommand
#[derive(Debug, Args)]
pub struct FetchCommand {
    #[command(subcommand)]
    target: FetchTarget,
}

#[derive(Debug, Subcommand)]
enum FetchTarget {
    /// Crawl every repository of an organization
    Org {
        /// Organization login, e.g. `rust-lang`
        org: String,
    },
    /// Crawl one repository
    Repo {
        /// `https://github.com/{owner}/{repo}`
        url: String,
    },
}

impl FetchCommand {
    /// Run the job as a tracked task until it finishes or is cancelled.
    pub async fn execute(&self, cli: &Cli, cancel: SharedCancellation) -> Result<(), CliError> {
        let runner = cli.runner()?;
        let progress = progress_for(cli);

        let task = match &self.target {
            FetchTarget::Org { org } => {
                info!(org = %org, "Starting organization fetch");
                runner
                    .start_organization(org, &progress, Some(cancel.as_ref()))
                    .await
            }
            FetchTarget::Repo { url } => {
                info!(url = %url, "Starting repository fetch");
                runner.start_repository(url, &progress, Some(cancel.as_ref())).await
            }
        };
        progress.finish();

        report_task(cli, &task?)
    }
}

pub(super) fn progress_for(cli: &Cli) -> BarProgress {
    match cli.output_format {
        OutputFormat::Human => BarProgress::new(),
        OutputFormat::Json => BarProgress::hidden(),
    }
}

/// Print a finished task; a failed task is an error.
pub(super) fn report_task(cli: &Cli, task: &Task) -> Result<(), CliError> {
    cli.emit(task, |task| match task.status {
        TaskStatus::Completed => {
            println!("\nTask {} completed", task.id);
            if let Some(result) = &task.result {
                for key in ["repositories", "files", "cached_files", "failed_files"] {
                    if let Some(value) = result.get(key) {
                        println!("  {key}: {value}");
                    }
                }
                if let Some(dir) = result.get("cache_dir").and_then(|v| v.as_str()) {
                    println!("  cache: {dir}");
                }
            }
        }
        TaskStatus::Cancelled => {
            println!("\nTask {} cancelled at {:.0}%", task.id, task.progress);
        }
        _ => {
            eprintln!("\nTask {} {}", task.id, task.status);
        }
    })?;

    if task.status == TaskStatus::Failed {
        return Err(CliError::TaskFailed {
            id: task.id.clone(),
            message: task.error_message().unwrap_or("unknown error").to_string(),
        });
    }
    Ok(())
}
