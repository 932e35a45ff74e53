//! Main entry point for the repo-harvester CLI

use clap::Parser;
use repo_harvester::cancel::CancellationSignal;
use repo_harvester::cli::{Cli, Commands};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber with optional JSON formatting
fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("repo_harvester=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr {
        match repo_harvester::metrics::init_metrics(addr) {
            Ok(()) => info!(%addr, "Serving metrics"),
            Err(e) => warn!("Failed to start metrics exporter: {}", e),
        }
    }

    // Ctrl+C stops the running job at its next checkpoint and cancels its task
    let cancel = CancellationSignal::shared();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl+C received - cancelling the running job...");
                cancel.cancel();
            }
        }
    });

    let result = match &cli.command {
        Commands::Fetch(cmd) => cmd
            .execute(&cli, cancel.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Tasks(cmd) => cmd
            .execute(&cli, cancel.clone())
            .await
            .map_err(|e| anyhow::anyhow!(e)),
        Commands::Cache(cmd) => cmd.execute(&cli).map_err(|e| anyhow::anyhow!(e)),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
}
