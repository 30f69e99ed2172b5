//! HTTP sink that posts markdown comments to an issue thread.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use warden_core::truncate_with_marker;

const ERROR_BODY_CAP_BYTES: usize = 800;

/// Bounded retry for comment posts. Rate limiting and server errors are
/// worth waiting out; anything else fails the post immediately and the
/// caller drops the batch.
#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
}

impl RetryPolicy {
    const DELAY_CAP: Duration = Duration::from_secs(30);

    fn new(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms.max(1)),
        }
    }

    /// `attempt` counts completed attempts, starting at zero.
    fn should_retry_status(&self, attempt: usize, status: StatusCode) -> bool {
        attempt + 1 < self.max_attempts
            && (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
    }

    fn should_retry_error(&self, attempt: usize, error: &reqwest::Error) -> bool {
        attempt + 1 < self.max_attempts
            && (error.is_timeout() || error.is_connect() || error.is_request())
    }

    /// Doubling backoff, capped, with a server-provided `retry-after`
    /// taking precedence (floored at the base delay).
    fn delay_before_retry(&self, attempt: usize, server_delay: Option<Duration>) -> Duration {
        if let Some(server_delay) = server_delay {
            return server_delay.max(self.base_delay);
        }
        let shift = u32::try_from(attempt.min(10)).unwrap_or(10);
        self.base_delay
            .saturating_mul(1_u32 << shift)
            .min(Self::DELAY_CAP)
    }

    fn server_delay(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        let seconds = headers
            .get(RETRY_AFTER)?
            .to_str()
            .ok()?
            .trim()
            .parse::<u64>()
            .ok()?;
        Some(Duration::from_secs(seconds))
    }
}

/// Destination thread for progress comments.
#[derive(Debug, Clone)]
pub struct PostTarget {
    pub api_base: String,
    /// `owner/repo` slug.
    pub repo_slug: String,
    pub issue_number: u64,
}

/// Minimal posting surface the reporting pipeline depends on. The pipeline
/// treats posting as fire-and-forget: an error is logged by the caller and
/// the batch is not retried.
#[async_trait]
pub trait CommentSink: Send + Sync {
    async fn post(&self, body: &str) -> Result<()>;
}

#[derive(Debug, Clone, Deserialize)]
struct CommentCreateResponse {
    id: u64,
}

#[derive(Clone)]
pub struct IssueCommentClient {
    http: reqwest::Client,
    target: PostTarget,
    retry: RetryPolicy,
}

impl IssueCommentClient {
    pub fn new(
        target: PostTarget,
        token: &str,
        request_timeout_ms: u64,
        retry_max_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("warden-agent"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            reqwest::header::HeaderValue::from_static("2022-11-28"),
        );
        let auth_header = format!("Bearer {}", token.trim());
        headers.insert(
            reqwest::header::AUTHORIZATION,
            reqwest::header::HeaderValue::from_str(&auth_header)
                .context("invalid comment authorization header")?,
        );

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to create comment api client")?;
        Ok(Self {
            http,
            target: PostTarget {
                api_base: target.api_base.trim_end_matches('/').to_string(),
                ..target
            },
            retry: RetryPolicy::new(retry_max_attempts, retry_base_delay_ms),
        })
    }

    async fn create_comment(&self, body: &str) -> Result<CommentCreateResponse> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.target.api_base, self.target.repo_slug, self.target.issue_number
        );
        let payload = json!({ "body": body });
        let mut attempt = 0_usize;
        loop {
            match self.http.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<CommentCreateResponse>()
                        .await
                        .context("failed to decode comment create response");
                }
                Ok(response) => {
                    let status = response.status();
                    let server_delay = RetryPolicy::server_delay(response.headers());
                    if self.retry.should_retry_status(attempt, status) {
                        tokio::time::sleep(self.retry.delay_before_retry(attempt, server_delay))
                            .await;
                        attempt += 1;
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    bail!(
                        "comment create failed with status {}: {}",
                        status.as_u16(),
                        truncate_with_marker(&text, ERROR_BODY_CAP_BYTES)
                    );
                }
                Err(error) => {
                    if self.retry.should_retry_error(attempt, &error) {
                        tokio::time::sleep(self.retry.delay_before_retry(attempt, None)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(error).context("comment create request failed");
                }
            }
        }
    }
}

#[async_trait]
impl CommentSink for IssueCommentClient {
    async fn post(&self, body: &str) -> Result<()> {
        let created = self.create_comment(body).await?;
        tracing::debug!(comment_id = created.id, "posted progress comment");
        Ok(())
    }
}

/// Sink for sessions with no external thread configured. Posts are logged
/// and discarded.
pub struct NullCommentSink;

#[async_trait]
impl CommentSink for NullCommentSink {
    async fn post(&self, body: &str) -> Result<()> {
        tracing::debug!(bytes = body.len(), "no comment target configured, dropping post");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;

    use super::*;

    fn client_for(server: &MockServer, retry_max_attempts: usize) -> IssueCommentClient {
        IssueCommentClient::new(
            PostTarget {
                api_base: server.base_url(),
                repo_slug: "acme/widgets".to_string(),
                issue_number: 7,
            },
            "test-token",
            2_000,
            retry_max_attempts,
            1,
        )
        .expect("client")
    }

    #[tokio::test]
    async fn functional_post_sends_comment_with_auth_headers() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/acme/widgets/issues/7/comments")
                    .header("authorization", "Bearer test-token")
                    .header("accept", "application/vnd.github+json")
                    .json_body(serde_json::json!({ "body": "hello" }));
                then.status(201).json_body(serde_json::json!({ "id": 42 }));
            })
            .await;

        client_for(&server, 1).post("hello").await.expect("post");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn functional_post_retries_on_server_error_then_succeeds() {
        let server = MockServer::start_async().await;
        let failure = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/repos/acme/widgets/issues/7/comments")
                    .json_body_partial(r#"{"body": "retry me"}"#);
                then.status(502).body("bad gateway");
            })
            .await;

        let client = client_for(&server, 3);
        let error = client.post("retry me").await.expect_err("exhausts retries");
        assert!(error.to_string().contains("502"));
        assert_eq!(failure.hits_async().await, 3);
    }

    #[tokio::test]
    async fn regression_post_does_not_retry_client_errors() {
        let server = MockServer::start_async().await;
        let rejection = server
            .mock_async(|when, then| {
                when.method(POST).path("/repos/acme/widgets/issues/7/comments");
                then.status(422).body("validation failed");
            })
            .await;

        let client = client_for(&server, 5);
        let error = client.post("nope").await.expect_err("not retried");
        assert!(error.to_string().contains("422"));
        assert_eq!(rejection.hits_async().await, 1);
    }

    #[test]
    fn unit_retry_policy_retries_rate_limit_and_server_errors_only() {
        let policy = RetryPolicy::new(3, 100);
        assert!(policy.should_retry_status(0, StatusCode::TOO_MANY_REQUESTS));
        assert!(policy.should_retry_status(1, StatusCode::BAD_GATEWAY));
        assert!(!policy.should_retry_status(0, StatusCode::UNPROCESSABLE_ENTITY));
        assert!(!policy.should_retry_status(0, StatusCode::NOT_FOUND));
        // The final allowed attempt never retries.
        assert!(!policy.should_retry_status(2, StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn unit_retry_policy_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(10, 200);
        assert_eq!(
            policy.delay_before_retry(0, None),
            Duration::from_millis(200)
        );
        assert_eq!(
            policy.delay_before_retry(2, None),
            Duration::from_millis(800)
        );
        let policy = RetryPolicy::new(20, 10_000);
        assert_eq!(policy.delay_before_retry(8, None), Duration::from_secs(30));
    }

    #[test]
    fn unit_retry_policy_floors_server_retry_after_at_base_delay() {
        let policy = RetryPolicy::new(3, 200);
        assert_eq!(
            policy.delay_before_retry(0, Some(Duration::from_millis(50))),
            Duration::from_millis(200)
        );
        assert_eq!(
            policy.delay_before_retry(0, Some(Duration::from_secs(4))),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn unit_server_delay_parses_whole_seconds_only() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(RETRY_AFTER, reqwest::header::HeaderValue::from_static("4"));
        assert_eq!(
            RetryPolicy::server_delay(&headers),
            Some(Duration::from_secs(4))
        );
        headers.insert(
            RETRY_AFTER,
            reqwest::header::HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(RetryPolicy::server_delay(&headers), None);
    }
}
