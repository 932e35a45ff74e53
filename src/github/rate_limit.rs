//! Process-wide request pacing and hourly quota tracking
//!
//! One [`RateLimiter`] is shared by every [`GithubClient`](super::GithubClient)
//! in the process. It enforces a minimum spacing between requests, widens that
//! spacing when the API reports a low remaining quota, and counts requests in
//! an hour window so callers can fail fast instead of sleeping for an hour.
//!
//! The mutex guards only timing and counters. A caller reserves its slot under
//! the lock and sleeps after releasing it, so the lock is never held across a
//! sleep or a network call.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::GithubError;
use crate::config::HarvestConfig;

const HOUR: Duration = Duration::from_secs(3600);
const MIN_QUOTA_WAIT: Duration = Duration::from_secs(60);

/// Share of the hourly budget after which the remaining count is checked.
const BUDGET_WARN_RATIO: f64 = 0.9;

/// Remaining requests at or below which [`RateLimiter::check_hourly_budget`] fails.
const BUDGET_FLOOR: u64 = 10;

/// Pacing parameters for [`RateLimiter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Initial minimum spacing between requests
    pub min_interval: Duration,
    /// Spacing applied once the remaining quota is low
    pub low_quota_interval: Duration,
    /// Remaining quota at or below which spacing escalates
    pub low_quota_threshold: u64,
    /// Requests allowed per hour window
    pub hourly_budget: u64,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(1),
            low_quota_interval: Duration::from_secs(2),
            low_quota_threshold: 100,
            hourly_budget: crate::config::HOURLY_REQUEST_BUDGET,
        }
    }
}

impl From<&HarvestConfig> for RateLimiterConfig {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_request_interval_ms),
            low_quota_interval: Duration::from_millis(config.low_quota_interval_ms),
            low_quota_threshold: config.low_quota_threshold,
            hourly_budget: config.hourly_request_budget,
        }
    }
}

#[derive(Debug)]
struct LimiterState {
    last_request: Option<Instant>,
    min_interval: Duration,
    requests_this_hour: u64,
    hour_start: Instant,
    last_remaining: Option<u64>,
    last_reset_epoch: Option<i64>,
}

impl LimiterState {
    /// Reset the hourly counter once the window has elapsed.
    fn roll_window(&mut self, now: Instant) {
        if now.duration_since(self.hour_start) > HOUR {
            debug!(
                requests = self.requests_this_hour,
                "Resetting hourly request counter"
            );
            self.hour_start = now;
            self.requests_this_hour = 0;
        }
    }
}

/// Shared request pacer
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a limiter whose hour window starts now.
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            config,
            state: Mutex::new(LimiterState {
                last_request: None,
                min_interval: config.min_interval,
                requests_this_hour: 0,
                hour_start: Instant::now(),
                last_remaining: None,
                last_reset_epoch: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LimiterState> {
        // Counters stay meaningful even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Wait until one more request may be issued.
    ///
    /// Returns the instant the request was scheduled for. Slots handed out to
    /// concurrent callers are at least the current minimum interval apart.
    pub async fn acquire(&self) -> Instant {
        let slot = {
            let mut state = self.lock();
            let now = Instant::now();
            state.roll_window(now);

            let slot = match state.last_request {
                Some(last) => (last + state.min_interval).max(now),
                None => now,
            };
            state.last_request = Some(slot);
            state.requests_this_hour += 1;

            if slot > now {
                debug!(
                    wait_ms = slot.duration_since(now).as_millis() as u64,
                    "Rate limiting: waiting before next request"
                );
            }
            slot
        };

        sleep_until(slot).await;
        slot
    }

    /// Fail fast when the hourly budget is nearly gone.
    ///
    /// Once more than 90% of the budget is used and no more than 10 requests
    /// remain, returns [`GithubError::QuotaExhausted`] carrying the time left
    /// in the window (at least one minute) instead of sleeping.
    pub fn check_hourly_budget(&self) -> Result<(), GithubError> {
        let mut state = self.lock();
        let now = Instant::now();
        state.roll_window(now);

        let budget = self.config.hourly_budget;
        let used = state.requests_this_hour;
        if (used as f64) > (budget as f64) * BUDGET_WARN_RATIO {
            let remaining = budget.saturating_sub(used);
            if remaining <= BUDGET_FLOOR {
                let elapsed = now.duration_since(state.hour_start);
                let wait = HOUR.saturating_sub(elapsed).max(MIN_QUOTA_WAIT);
                warn!(
                    used,
                    budget,
                    wait_secs = wait.as_secs(),
                    "Hourly request budget nearly exhausted"
                );
                return Err(GithubError::QuotaExhausted { wait });
            }
        }
        Ok(())
    }

    /// Adapt pacing to the quota reported by a response.
    pub fn record_response(&self, remaining: Option<u64>, reset_epoch: Option<i64>) {
        let mut state = self.lock();
        if let Some(reset) = reset_epoch {
            state.last_reset_epoch = Some(reset);
        }
        let Some(remaining) = remaining else {
            return;
        };
        state.last_remaining = Some(remaining);
        crate::metrics::record_quota_remaining(remaining);

        if remaining <= self.config.low_quota_threshold
            && state.min_interval < self.config.low_quota_interval
        {
            warn!(
                remaining,
                interval_ms = self.config.low_quota_interval.as_millis() as u64,
                "API quota low, slowing down requests"
            );
            state.min_interval = self.config.low_quota_interval;
        }
    }

    /// Current minimum spacing between requests.
    pub fn min_interval(&self) -> Duration {
        self.lock().min_interval
    }

    /// Requests counted in the current hour window.
    pub fn requests_this_hour(&self) -> u64 {
        self.lock().requests_this_hour
    }

    /// Last remaining-quota value reported by the API.
    pub fn last_remaining(&self) -> Option<u64> {
        self.lock().last_remaining
    }

    /// Last reset epoch reported by the API.
    pub fn last_reset_epoch(&self) -> Option<i64> {
        self.lock().last_reset_epoch
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimiterConfig::default())
    }
}
