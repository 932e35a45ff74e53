//! Authenticated GitHub HTTP client
//!
//! Every request goes through the shared [`RateLimiter`] before it is sent and
//! reports the `x-ratelimit-*` headers back to it afterwards. Metadata calls
//! and raw downloads have independent retry budgets:
//!
//! - metadata (`get`): network errors retry with `base * 2^retry` plus a
//!   small jitter; a rate-limited 403/429 sleeps until the reported reset when
//!   that is close, and fails with [`GithubError::RateLimitExceeded`] when it is
//!   not; any other non-success status fails immediately.
//! - downloads (`download`): network errors retry with a larger budget and a
//!   wider jitter capped at 30 seconds; HTTP errors fail immediately.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::rate_limit::RateLimiter;
use super::types::{DirectoryListing, OrganizationInfo, RepositoryInfo};
use super::{GithubError, GithubResult, RepositoryApi};
use crate::config::{calculate_backoff, calculate_download_backoff, HarvestConfig};
use crate::metrics::{self, RequestKind};

const USER_AGENT: &str = concat!("repo-harvester/", env!("CARGO_PKG_VERSION"));
const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";
const MESSAGE_PREVIEW_CHARS: usize = 100;

/// Retry and timeout knobs taken from [`HarvestConfig`]
#[derive(Debug, Clone)]
struct RetryPolicy {
    max_retries: u32,
    download_retries: u32,
    backoff_base: Duration,
    rate_limit_buffer: Duration,
    max_rate_limit_wait: Duration,
    max_rate_limit_sleep: Duration,
    download_timeout: Duration,
}

impl From<&HarvestConfig> for RetryPolicy {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            download_retries: config.download_retries.max(1),
            backoff_base: config.backoff_base(),
            rate_limit_buffer: Duration::from_secs(config.rate_limit_buffer_secs),
            max_rate_limit_wait: Duration::from_secs(config.max_rate_limit_wait_secs),
            max_rate_limit_sleep: Duration::from_secs(config.max_rate_limit_sleep_secs),
            download_timeout: config.download_timeout(),
        }
    }
}

/// Outcome of one metadata attempt that did not return a body
enum AttemptFailure {
    /// Transport failure, retried with exponential backoff
    Network(GithubError),
    /// Rate limited with a reset close enough to sleep through
    RateLimited { error: GithubError, sleep: Duration },
    /// Give up now
    Fatal(GithubError),
}

/// GitHub REST client bound to a shared [`RateLimiter`]
#[derive(Debug, Clone)]
pub struct GithubClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
    rate_limiter: Arc<RateLimiter>,
    policy: RetryPolicy,
}

impl GithubClient {
    /// Build a client from configuration.
    ///
    /// # Errors
    /// [`GithubError::Client`] when the base URL is unusable or the HTTP
    /// client cannot be constructed.
    pub fn new(config: &HarvestConfig, rate_limiter: Arc<RateLimiter>) -> GithubResult<Self> {
        let base_url = Url::parse(&config.api_base_url)
            .map_err(|e| GithubError::Client(format!("invalid API base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GithubError::Client(format!(
                "API base URL cannot carry a path: {}",
                config.api_base_url
            )));
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| GithubError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            token: config.token.clone().filter(|t| !t.is_empty()),
            rate_limiter,
            policy: RetryPolicy::from(config),
        })
    }

    /// Shared rate limiter.
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Resolve a slash-separated endpoint against the base URL, percent-encoding
    /// each segment.
    pub fn endpoint_url(&self, endpoint: &str) -> GithubResult<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| GithubError::Client("API base URL cannot carry a path".to_string()))?;
            segments.pop_if_empty();
            segments.extend(endpoint.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    /// GET an API endpoint and deserialize the JSON body.
    ///
    /// Fails with [`GithubError::QuotaExhausted`] before sending anything when
    /// the hourly budget is nearly used up.
    pub async fn get<T>(&self, endpoint: &str, params: &[(&str, String)]) -> GithubResult<T>
    where
        T: DeserializeOwned,
    {
        self.rate_limiter.check_hourly_budget()?;
        let url = self.endpoint_url(endpoint)?;
        let max = self.policy.max_retries;
        let mut last_error = None;

        for attempt in 0..max {
            let (error, backoff) = match self.attempt_get(&url, params).await {
                Ok(value) => {
                    debug!(url = %url, attempt = attempt + 1, "Request succeeded");
                    return Ok(value);
                }
                Err(AttemptFailure::Fatal(e)) => return Err(e),
                Err(AttemptFailure::RateLimited { error, sleep }) => (error, sleep),
                Err(AttemptFailure::Network(error)) => {
                    (error, calculate_backoff(attempt + 1, self.policy.backoff_base))
                }
            };

            warn!(
                "Request to {} failed on attempt {}/{}: {}",
                url,
                attempt + 1,
                max,
                error
            );
            last_error = Some(error);

            if attempt + 1 < max {
                metrics::record_retry(RequestKind::Api, backoff);
                debug!("Retrying after {:?}", backoff);
                tokio::time::sleep(backoff).await;
            }
        }

        Err(GithubError::MaxRetries {
            attempts: max,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        })
    }

    async fn attempt_get<T>(&self, url: &Url, params: &[(&str, String)]) -> Result<T, AttemptFailure>
    where
        T: DeserializeOwned,
    {
        self.rate_limiter.acquire().await;
        metrics::record_request(RequestKind::Api);

        let mut request = self
            .client
            .get(url.clone())
            .header(ACCEPT, HeaderValue::from_static(GITHUB_ACCEPT))
            .query(params);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.is_builder() => {
                return Err(AttemptFailure::Fatal(GithubError::Client(e.to_string())))
            }
            Err(e) => return Err(AttemptFailure::Network(GithubError::Network(e.to_string()))),
        };

        let status = response.status();
        let headers = response.headers().clone();
        self.rate_limiter.record_response(
            header_value::<u64>(&headers, "x-ratelimit-remaining"),
            header_value::<i64>(&headers, "x-ratelimit-reset"),
        );

        if status.is_success() {
            // A body that stalls or drops mid-transfer is a transport failure
            let body = response
                .bytes()
                .await
                .map_err(|e| AttemptFailure::Network(GithubError::Network(e.to_string())))?;
            return serde_json::from_slice::<T>(&body)
                .map_err(|e| AttemptFailure::Fatal(GithubError::Parse(e.to_string())));
        }

        let body = response.text().await.unwrap_or_default();
        if is_rate_limited(status, &body) {
            return Err(self.rate_limit_failure(&headers));
        }

        Err(AttemptFailure::Fatal(GithubError::Api {
            status: status.as_u16(),
            message: extract_message(&body),
        }))
    }

    fn rate_limit_failure(&self, headers: &HeaderMap) -> AttemptFailure {
        metrics::record_rate_limit_hit();
        let until_reset = rate_limit_wait(headers, chrono::Utc::now().timestamp());

        if until_reset >= self.policy.max_rate_limit_wait {
            let wait = until_reset + self.policy.rate_limit_buffer;
            warn!(
                wait_secs = wait.as_secs(),
                "Rate limit reset too far away, giving up"
            );
            return AttemptFailure::Fatal(GithubError::RateLimitExceeded { wait });
        }

        let sleep = (until_reset + self.policy.rate_limit_buffer).min(self.policy.max_rate_limit_sleep);
        warn!(
            sleep_secs = sleep.as_secs(),
            "Rate limit exceeded, waiting for reset"
        );
        AttemptFailure::RateLimited {
            error: GithubError::RateLimitExceeded { wait: until_reset },
            sleep,
        }
    }

    /// Download the raw bytes behind `url`.
    pub async fn download(&self, url: &str) -> GithubResult<Vec<u8>> {
        let parsed = Url::parse(url).map_err(|e| GithubError::Client(format!("invalid download URL {url}: {e}")))?;
        let max = self.policy.download_retries;
        let mut last_error = None;

        for attempt in 0..max {
            self.rate_limiter.acquire().await;
            metrics::record_request(RequestKind::Download);

            let mut request = self
                .client
                .get(parsed.clone())
                .timeout(self.policy.download_timeout);
            if let Some(token) = self.token.as_ref().filter(|_| self.is_trusted_host(&parsed)) {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }

            let error = match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        let body = response.text().await.unwrap_or_default();
                        return Err(GithubError::Api {
                            status: status.as_u16(),
                            message: extract_message(&body),
                        });
                    }
                    match response.bytes().await {
                        Ok(bytes) => return Ok(bytes.to_vec()),
                        Err(e) => GithubError::Network(e.to_string()),
                    }
                }
                Err(e) if e.is_builder() => return Err(GithubError::Client(e.to_string())),
                Err(e) => GithubError::Network(e.to_string()),
            };

            warn!(
                "Download of {} failed on attempt {}/{}: {}",
                url,
                attempt + 1,
                max,
                error
            );
            last_error = Some(error);

            if attempt + 1 < max {
                let backoff = calculate_download_backoff(attempt + 1, self.policy.backoff_base);
                metrics::record_retry(RequestKind::Download, backoff);
                debug!("Retrying download after {:?}", backoff);
                tokio::time::sleep(backoff).await;
            }
        }

        Err(GithubError::MaxRetries {
            attempts: max,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no attempt made".to_string()),
        })
    }

    /// The token is only sent to the API host and GitHub's raw content hosts.
    fn is_trusted_host(&self, url: &Url) -> bool {
        match url.host_str() {
            Some(host) => {
                Some(host) == self.base_url.host_str() || host.ends_with("githubusercontent.com")
            }
            None => false,
        }
    }
}

#[async_trait]
impl RepositoryApi for GithubClient {
    async fn organization(&self, org: &str) -> GithubResult<OrganizationInfo> {
        self.get(&format!("orgs/{org}"), &[]).await
    }

    async fn organization_repos(
        &self,
        org: &str,
        page: u32,
        per_page: u32,
    ) -> GithubResult<Vec<RepositoryInfo>> {
        let params = [("page", page.to_string()), ("per_page", per_page.to_string())];
        self.get(&format!("orgs/{org}/repos"), &params).await
    }

    async fn repository(&self, owner: &str, repo: &str) -> GithubResult<RepositoryInfo> {
        self.get(&format!("repos/{owner}/{repo}"), &[]).await
    }

    async fn contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: Option<&str>,
    ) -> GithubResult<DirectoryListing> {
        let params: Vec<(&str, String)> = git_ref.map(|r| ("ref", r.to_string())).into_iter().collect();
        self.get(&format!("repos/{owner}/{repo}/contents/{path}"), &params)
            .await
    }

    async fn download(&self, url: &str) -> GithubResult<Vec<u8>> {
        GithubClient::download(self, url).await
    }
}

/// Whether a non-success response is a rate-limit rejection.
fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    matches!(status, StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS)
        && body.to_ascii_lowercase().contains("rate limit")
}

/// Time until the rate limit resets: `retry-after` when present, otherwise
/// `x-ratelimit-reset - now`, never negative.
fn rate_limit_wait(headers: &HeaderMap, now_epoch: i64) -> Duration {
    if let Some(secs) = header_value::<u64>(headers, "retry-after") {
        return Duration::from_secs(secs);
    }
    let reset = header_value::<i64>(headers, "x-ratelimit-reset").unwrap_or(now_epoch);
    Duration::from_secs(reset.saturating_sub(now_epoch).max(0) as u64)
}

fn header_value<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// The `message` field of a GitHub error body, or the start of the raw body.
fn extract_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(MESSAGE_PREVIEW_CHARS).collect())
}
