//! Integration tests for the GitHub client retry policy against a mock server

use mockito::{Matcher, Server};
use repo_harvester::config::HarvestConfig;
use repo_harvester::github::{
    DirectoryListing, GithubClient, GithubError, RateLimiter, RateLimiterConfig, RepositoryApi,
};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Unpaced config with millisecond backoff so retries finish quickly.
fn fast_config(base_url: &str) -> HarvestConfig {
    let mut config = HarvestConfig::default().with_api_base_url(base_url);
    config.min_request_interval_ms = 0;
    config.low_quota_interval_ms = 5;
    config.backoff_base_ms = 1;
    config.rate_limit_buffer_secs = 0;
    config.max_retries = 3;
    config.download_retries = 3;
    config.request_timeout_secs = 5;
    config
}

fn build_client(config: &HarvestConfig) -> GithubClient {
    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig::from(config)));
    GithubClient::new(config, limiter).unwrap()
}

fn client_for(base_url: &str, token: Option<&str>) -> GithubClient {
    let mut config = fast_config(base_url);
    if let Some(token) = token {
        config = config.with_token(token);
    }
    build_client(&config)
}

fn epoch_in(secs: i64) -> String {
    (chrono::Utc::now().timestamp() + secs).to_string()
}

#[tokio::test]
async fn test_organization_success_records_quota() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/orgs/acme")
        .match_header("authorization", "Bearer secret")
        .match_header("accept", "application/vnd.github.v3+json")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("x-ratelimit-remaining", "4999")
        .with_header("x-ratelimit-reset", "1700000000")
        .with_body(r#"{"login": "acme", "public_repos": 12}"#)
        .expect(1)
        .create_async()
        .await;
    let client = client_for(&server.url(), Some("secret"));

    let info = client.organization("acme").await.unwrap();

    assert_eq!(info.login, "acme");
    assert_eq!(info.public_repos, 12);
    assert_eq!(client.rate_limiter().last_remaining(), Some(4999));
    assert_eq!(client.rate_limiter().last_reset_epoch(), Some(1_700_000_000));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_organization_repos_query() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/orgs/acme/repos")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("page".into(), "2".into()),
            Matcher::UrlEncoded("per_page".into(), "100".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"[{"name": "widgets", "owner": {"login": "acme"}, "default_branch": "develop"}]"#,
        )
        .create_async()
        .await;
    let client = client_for(&server.url(), None);

    let repos = client.organization_repos("acme", 2, 100).await.unwrap();

    assert_eq!(repos.len(), 1);
    let repo = repos[0].clone().into_ref("main");
    assert_eq!(repo.full_name(), "acme/widgets");
    assert_eq!(repo.default_branch(), "develop");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_contents_with_ref() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/repos/acme/widgets/contents/docs/getting%20started")
        .match_query(Matcher::UrlEncoded("ref".into(), "main".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"[{"name": "a.md", "path": "docs/getting started/a.md", "sha": "1", "size": 5, "type": "file"}]"#)
        .create_async()
        .await;
    let client = client_for(&server.url(), None);

    let listing = client
        .contents("acme", "widgets", "docs/getting started", Some("main"))
        .await
        .unwrap();

    match listing {
        DirectoryListing::Entries(entries) => assert_eq!(entries[0].name, "a.md"),
        other => panic!("Expected entries, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_short_rate_limit_is_retried_until_budget_exhausted() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/orgs/acme")
        .with_status(403)
        .with_header("x-ratelimit-remaining", "0")
        .with_header("x-ratelimit-reset", &epoch_in(-5))
        .with_body(r#"{"message": "API rate limit exceeded for 127.0.0.1."}"#)
        .expect(3)
        .create_async()
        .await;
    let client = client_for(&server.url(), None);

    let result = client.organization("acme").await;

    match result {
        Err(GithubError::MaxRetries {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.contains("rate limit exceeded"));
        }
        other => panic!("Expected MaxRetries, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_short_rate_limit_then_success() {
    let mut server = Server::new_async().await;
    let limited = server
        .mock("GET", "/orgs/acme")
        .with_status(403)
        .with_header("x-ratelimit-remaining", "0")
        .with_header("x-ratelimit-reset", &epoch_in(-1))
        .with_body(r#"{"message": "API rate limit exceeded"}"#)
        .expect(1)
        .create_async()
        .await;
    let ok = server
        .mock("GET", "/orgs/acme")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("x-ratelimit-remaining", "4999")
        .with_body(r#"{"login": "acme", "public_repos": 7}"#)
        .expect(1)
        .create_async()
        .await;
    let client = client_for(&server.url(), None);

    let info = client.organization("acme").await.unwrap();

    assert_eq!(info.public_repos, 7);
    assert_eq!(client.rate_limiter().last_remaining(), Some(4999));
    assert_eq!(client.rate_limiter().requests_this_hour(), 2);
    limited.assert_async().await;
    ok.assert_async().await;
}

#[tokio::test]
async fn test_stalled_body_is_retried() {
    let mut server = Server::new_async().await;
    let responses = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&responses);
    let mock = server
        .mock("GET", "/orgs/acme")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_chunked_body(move |w| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                // Headers and half the body, then nothing until the client gives up
                w.write_all(br#"{"login": "#)?;
                w.flush()?;
                std::thread::sleep(Duration::from_millis(2500));
            } else {
                w.write_all(br#"{"login": "#)?;
            }
            w.write_all(br#""acme", "public_repos": 3}"#)
        })
        .expect(2)
        .create_async()
        .await;
    let mut config = fast_config(&server.url());
    config.request_timeout_secs = 1;
    let client = build_client(&config);

    let info = client.organization("acme").await.unwrap();

    assert_eq!(info.login, "acme");
    assert_eq!(info.public_repos, 3);
    assert_eq!(client.rate_limiter().requests_this_hour(), 2);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_malformed_body_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/orgs/acme")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"login": 42}"#)
        .expect(1)
        .create_async()
        .await;
    let client = client_for(&server.url(), None);

    let result = client.organization("acme").await;

    assert!(matches!(result, Err(GithubError::Parse(_))));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_metadata_network_failure_is_retried() {
    // Nothing listens on port 1
    let client = client_for("http://127.0.0.1:1", None);

    let result = client.organization("acme").await;

    match result {
        Err(GithubError::MaxRetries {
            attempts,
            last_error,
        }) => {
            assert_eq!(attempts, 3);
            assert!(last_error.starts_with("network error"), "{last_error}");
        }
        other => panic!("Expected MaxRetries, got {other:?}"),
    }
    assert_eq!(client.rate_limiter().requests_this_hour(), 3);
}

#[tokio::test]
async fn test_distant_rate_limit_reset_fails_immediately() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/orgs/acme")
        .with_status(403)
        .with_header("x-ratelimit-remaining", "0")
        .with_header("x-ratelimit-reset", &epoch_in(600))
        .with_body(r#"{"message": "API rate limit exceeded"}"#)
        .expect(1)
        .create_async()
        .await;
    let client = client_for(&server.url(), None);

    let result = client.organization("acme").await;

    match result {
        Err(GithubError::RateLimitExceeded { wait }) => {
            assert!(wait >= Duration::from_secs(590), "wait was {wait:?}");
            assert!(wait <= Duration::from_secs(600));
        }
        other => panic!("Expected RateLimitExceeded, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/repos/acme/missing")
        .with_status(404)
        .with_body(r#"{"message": "Not Found"}"#)
        .expect(1)
        .create_async()
        .await;
    let client = client_for(&server.url(), None);

    let result = client.repository("acme", "missing").await;

    match result {
        Err(GithubError::Api { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "Not Found");
        }
        other => panic!("Expected Api error, got {other:?}"),
    }
    mock.assert_async().await;
}

#[tokio::test]
async fn test_forbidden_without_rate_limit_is_not_retried() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/orgs/secret")
        .with_status(403)
        .with_body(r#"{"message": "Resource not accessible by integration"}"#)
        .expect(1)
        .create_async()
        .await;
    let client = client_for(&server.url(), None);

    let result = client.organization("secret").await;

    assert!(matches!(result, Err(GithubError::Api { status: 403, .. })));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_low_remaining_quota_slows_requests() {
    let mut server = Server::new_async().await;
    let _mock = server
        .mock("GET", "/orgs/acme")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("x-ratelimit-remaining", "50")
        .with_body(r#"{"login": "acme", "public_repos": 1}"#)
        .create_async()
        .await;
    let client = client_for(&server.url(), None);
    assert_eq!(client.rate_limiter().min_interval(), Duration::ZERO);

    client.organization("acme").await.unwrap();

    assert_eq!(
        client.rate_limiter().min_interval(),
        Duration::from_millis(5)
    );
}

#[tokio::test]
async fn test_download_sends_token_to_api_host() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/raw/acme/widgets/main/docs/a.md")
        .match_header("authorization", "Bearer secret")
        .with_status(200)
        .with_body("# Hello")
        .create_async()
        .await;
    let client = client_for(&server.url(), Some("secret"));

    let bytes = client
        .download(&format!("{}/raw/acme/widgets/main/docs/a.md", server.url()))
        .await
        .unwrap();

    assert_eq!(bytes, b"# Hello");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_download_withholds_token_from_other_hosts() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/file.md")
        .match_header("authorization", Matcher::Missing)
        .with_status(200)
        .with_body("ok")
        .create_async()
        .await;
    let client = client_for("https://api.github.com", Some("secret"));

    let bytes = client
        .download(&format!("{}/file.md", server.url()))
        .await
        .unwrap();

    assert_eq!(bytes, b"ok");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_download_server_error_fails_immediately() {
    let mut server = Server::new_async().await;
    let mock = server
        .mock("GET", "/file.md")
        .with_status(500)
        .with_body("boom")
        .expect(1)
        .create_async()
        .await;
    let client = client_for(&server.url(), None);

    let result = client.download(&format!("{}/file.md", server.url())).await;

    assert!(matches!(result, Err(GithubError::Api { status: 500, .. })));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_download_network_failure_is_retried() {
    let client = client_for("https://api.github.com", None);

    // Nothing listens on port 1
    let result = client.download("http://127.0.0.1:1/file.md").await;

    match result {
        Err(GithubError::MaxRetries { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("Expected MaxRetries, got {other:?}"),
    }
    assert_eq!(client.rate_limiter().requests_this_hour(), 3);
}
