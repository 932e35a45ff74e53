//! Harvest metrics
//!
//! Counters and gauges for API traffic, rate-limit pressure, crawl outcomes
//! and task completion. The `metrics` facade is a no-op until a recorder is
//! installed, so library code records unconditionally; the binary installs a
//! Prometheus exporter with [`init_metrics`] when asked to.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Kind of outbound request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// JSON metadata call against the API
    Api,
    /// Raw file download
    Download,
}

impl RequestKind {
    fn label(self) -> &'static str {
        match self {
            RequestKind::Api => "api",
            RequestKind::Download => "download",
        }
    }
}

/// Install the Prometheus exporter on `addr`. Idempotent.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| {
            METRICS_INITIALIZED.store(false, Ordering::SeqCst);
            format!("Failed to install Prometheus exporter: {e}")
        })?;

    describe_counter!(
        "github_requests_total",
        Unit::Count,
        "Requests issued to the GitHub API and raw download host"
    );
    describe_counter!(
        "github_retries_total",
        Unit::Count,
        "Retry attempts after transient failures"
    );
    describe_histogram!(
        "github_retry_backoff_seconds",
        Unit::Seconds,
        "Backoff slept before a retry"
    );
    describe_counter!(
        "github_rate_limit_hits_total",
        Unit::Count,
        "Responses rejected by the API rate limit"
    );
    describe_gauge!(
        "github_quota_remaining",
        Unit::Count,
        "Remaining requests reported by the API"
    );
    describe_counter!(
        "crawl_files_cached_total",
        Unit::Count,
        "Files written to the cache"
    );
    describe_counter!(
        "crawl_files_failed_total",
        Unit::Count,
        "Files recorded with a fetch error"
    );
    describe_counter!(
        "tasks_finished_total",
        Unit::Count,
        "Tasks that reached a terminal state"
    );

    info!("Metrics exporter listening on {}", addr);
    Ok(())
}

/// Count one outbound request.
pub fn record_request(kind: RequestKind) {
    counter!("github_requests_total", "kind" => kind.label()).increment(1);
}

/// Count a retry and the backoff slept before it.
pub fn record_retry(kind: RequestKind, backoff: Duration) {
    counter!("github_retries_total", "kind" => kind.label()).increment(1);
    histogram!("github_retry_backoff_seconds", "kind" => kind.label())
        .record(backoff.as_secs_f64());
}

/// Count a rate-limit rejection.
pub fn record_rate_limit_hit() {
    counter!("github_rate_limit_hits_total").increment(1);
}

/// Publish the remaining quota reported by the API.
pub fn record_quota_remaining(remaining: u64) {
    gauge!("github_quota_remaining").set(remaining as f64);
}

/// Count a cached file.
pub fn record_file_cached() {
    counter!("crawl_files_cached_total").increment(1);
}

/// Count a file recorded with an error.
pub fn record_file_failed() {
    counter!("crawl_files_failed_total").increment(1);
}

/// Count a task reaching a terminal state.
pub fn record_task_finished(status: &'static str) {
    counter!("tasks_finished_total", "status" => status).increment(1);
}
