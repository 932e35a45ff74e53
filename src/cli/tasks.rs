//! Task commands

use clap::{Args, Subcommand};

use super::fetch::{progress_for, report_task};
use super::{Cli, CliError};
use crate::cancel::SharedCancellation;
use crate::tasks::{Task, TaskError};

/// Tasks subcommand
#[derive(Debug, Args)]
pub struct TasksCommand {
    #[command(subcommand)]
    action: TasksAction,
}

#[derive(Debug, Subcommand)]
enum TasksAction {
    /// List tasks, newest first
    List {
        /// Only interrupted tasks, most recently updated first
        #[arg(long)]
        resumable: bool,
    },
    /// Show one task
    Show {
        /// Task id
        id: String,
    },
    /// Cancel a task; running jobs stop at their next checkpoint
    Cancel {
        /// Task id
        id: String,
    },
    /// Run an interrupted task again
    Resume {
        /// Task id
        id: String,
    },
}

impl TasksCommand {
    /// Execute the tasks command.
    pub async fn execute(&self, cli: &Cli, cancel: SharedCancellation) -> Result<(), CliError> {
        match &self.action {
            TasksAction::List { resumable: false } => {
                let tasks = cli.tracker()?.list_tasks()?;
                cli.emit(&tasks, |tasks| {
                    if tasks.is_empty() {
                        println!("No tasks");
                    }
                    for task in tasks {
                        print_row(task, &task.created_at.format("%Y-%m-%d %H:%M:%S").to_string());
                    }
                })
            }
            TasksAction::List { resumable: true } => {
                let tasks = cli.tracker()?.list_resumable_tasks()?;
                cli.emit(&tasks, |tasks| {
                    if tasks.is_empty() {
                        println!("No resumable tasks");
                    }
                    for entry in tasks {
                        print_row(&entry.task, &format!("updated {}", entry.updated_ago));
                    }
                })
            }
            TasksAction::Show { id } => {
                let task = cli
                    .tracker()?
                    .get_task(id)?
                    .ok_or_else(|| TaskError::NotFound(id.clone()))?;
                cli.emit(&task, print_details)
            }
            TasksAction::Cancel { id } => {
                let task = cli.tracker()?.cancel_task(id)?;
                cli.emit(&task, |task| println!("Task {} is {}", task.id, task.status))
            }
            TasksAction::Resume { id } => {
                let runner = cli.runner()?;
                let progress = progress_for(cli);
                let task = runner.resume(id, &progress, Some(cancel.as_ref())).await;
                progress.finish();
                report_task(cli, &task?)
            }
        }
    }
}

fn print_row(task: &Task, when: &str) {
    println!(
        "{:<36} {:<12} {:>5.1}%  {:<24} {}",
        task.id, task.status, task.progress, when, task.description
    );
}

fn print_details(task: &Task) {
    println!("Task:        {}", task.id);
    println!("Type:        {}", task.task_type);
    println!("Description: {}", task.description);
    println!("Status:      {}", task.status);
    println!("Progress:    {:.1}%", task.progress);
    if let Some(stage) = &task.current_stage {
        println!("Stage:       {} ({:.1}%)", stage, task.stage_progress);
    }
    for stage in &task.stages {
        println!("  done:      {} at {}", stage.name, stage.completed_at);
    }
    println!("Created:     {}", task.created_at);
    println!("Updated:     {}", task.updated_at);
    if let Some(error) = task.error_message() {
        println!("Error:       {error}");
    }
}
