//! Page requests against the issue search API
//!
//! [`HttpFetcher`] sends `GET <search_url>?jql=..&startAt=..&maxResults=..`,
//! classifies the outcome into a [`FetchError`], and retries transient
//! failures as directed by its [`RetryPolicy`]. Every attempt first waits on
//! the shared rate limiter, so concurrent queries never exceed the configured
//! request rate.

use crate::error::{ErrorKind, FetchError};
use crate::models::{Page, QuerySpec, RawRecord};
use crate::retry::{RetryDecision, RetryPolicy, RetryState};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use harvest_common::{HarvestError, Result};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// Fetcher Constants
// ============================================================================

/// Public Apache tracker search endpoint
pub const DEFAULT_SEARCH_URL: &str = "https://issues.apache.org/jira/rest/api/2/search";

/// Per-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;

pub const DEFAULT_USER_AGENT: &str = concat!("harvest/", env!("CARGO_PKG_VERSION"));

/// Issue fields requested from the server
pub const DEFAULT_FIELDS: &[&str] = &[
    "summary",
    "description",
    "comment",
    "labels",
    "priority",
    "status",
    "reporter",
    "assignee",
    "created",
    "updated",
];

/// Error bodies are truncated to this many characters in messages
const MAX_ERROR_BODY_CHARS: usize = 200;

/// Source of result pages for the pipeline.
///
/// Implementations must be idempotent for a given `(query, offset, page_size)`
/// and must only return terminal errors: transient failures are retried
/// inside.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_page(
        &self,
        query: &QuerySpec,
        offset: u64,
        page_size: u32,
    ) -> std::result::Result<Page, FetchError>;
}

/// HTTP settings for [`HttpFetcher`]
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub search_url: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub fields: Vec<String>,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            search_url: DEFAULT_SEARCH_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Limiter allowing `requests_per_minute` evenly spaced requests.
///
/// Returns `None` for 0, meaning unlimited.
pub fn rate_limiter(requests_per_minute: u32) -> Option<Arc<DefaultDirectRateLimiter>> {
    let rpm = NonZeroU32::new(requests_per_minute)?;
    let quota = Quota::per_minute(rpm).allow_burst(NonZeroU32::MIN);
    Some(Arc::new(RateLimiter::direct(quota)))
}

/// Search API client with retries
pub struct HttpFetcher {
    client: Client,
    config: FetcherConfig,
    policy: RetryPolicy,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl HttpFetcher {
    pub fn new(config: FetcherConfig, policy: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| HarvestError::config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            policy,
            limiter: None,
        })
    }

    /// Route every request through `limiter`, which may be shared with other fetchers
    pub fn with_rate_limiter(mut self, limiter: Option<Arc<DefaultDirectRateLimiter>>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn log_retry(&self, query: &QuerySpec, offset: u64, state: &RetryState, error: &FetchError) {
        warn!(
            query_id = %query.id,
            offset,
            attempt = state.attempt(),
            max_attempts = self.policy.config().max_attempts,
            kind = state.last_error().map(ErrorKind::as_str),
            delay_ms = state.next_delay().map(|d| d.as_millis() as u64),
            error = %error,
            "Page request failed, backing off"
        );
    }

    /// One attempt, no retries
    async fn request_page(
        &self,
        query: &QuerySpec,
        offset: u64,
        page_size: u32,
    ) -> std::result::Result<Page, FetchError> {
        let params = [
            ("jql", query.jql.clone()),
            ("startAt", offset.to_string()),
            ("maxResults", page_size.to_string()),
            ("fields", self.config.fields.join(",")),
        ];

        let response = self
            .client
            .get(&self.config.search_url)
            .query(&params)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(FetchError::RateLimited {
                retry_after: retry_after(response.headers()),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = truncate(&body);
            return Err(if status.is_client_error() {
                FetchError::Client {
                    status: status.as_u16(),
                    message,
                }
            } else {
                FetchError::Server {
                    status: Some(status.as_u16()),
                    message,
                }
            });
        }

        let body = response.text().await.map_err(transport_error)?;
        parse_page(&body, offset, page_size)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch_page(
        &self,
        query: &QuerySpec,
        offset: u64,
        page_size: u32,
    ) -> std::result::Result<Page, FetchError> {
        let mut state = RetryState::new();

        loop {
            if let Some(limiter) = &self.limiter {
                limiter.until_ready().await;
            }

            let error = match self.request_page(query, offset, page_size).await {
                Ok(page) => {
                    if state.attempt() > 0 {
                        info!(
                            query_id = %query.id,
                            offset,
                            attempts = state.attempt() + 1,
                            waited_ms = state.total_delay().as_millis() as u64,
                            "Page fetched after retries"
                        );
                    }
                    return Ok(page);
                },
                Err(e) => e,
            };

            let attempt = state.record_failure(&error);
            match self.policy.decide(&error, attempt) {
                RetryDecision::Retry { after } => {
                    state.schedule(after);
                    self.log_retry(query, offset, &state, &error);
                    tokio::time::sleep(after).await;
                },
                RetryDecision::GiveUp if error.is_retryable() => {
                    warn!(
                        query_id = %query.id,
                        offset,
                        attempts = state.attempt(),
                        last_error = state.last_error().map(ErrorKind::as_str),
                        waited_ms = state.total_delay().as_millis() as u64,
                        error = %error,
                        "Retry budget exhausted"
                    );
                    return Err(FetchError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(error),
                    });
                },
                RetryDecision::GiveUp => return Err(error),
            }
        }
    }
}

/// Decode a search response body into a [`Page`].
///
/// Individual issues never fail the page; only page-level problems do: a body
/// that is not JSON, a missing `total`, a `startAt` other than the one asked
/// for, or an empty page before `total` is reached.
pub fn parse_page(body: &str, offset: u64, page_size: u32) -> std::result::Result<Page, FetchError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::server(format!("response is not valid JSON: {}", e)))?;

    let total = value
        .get("total")
        .and_then(Value::as_u64)
        .ok_or_else(|| FetchError::server("response has no numeric total"))?;

    if let Some(start_at) = value.get("startAt").and_then(Value::as_u64) {
        if start_at != offset {
            return Err(FetchError::server(format!(
                "requested startAt={} but server answered startAt={}",
                offset, start_at
            )));
        }
    }

    let records: Vec<RawRecord> = value
        .get("issues")
        .and_then(Value::as_array)
        .map(|issues| issues.iter().map(RawRecord::from_issue).collect())
        .unwrap_or_default();

    let page = Page {
        records,
        offset,
        page_size,
        total,
    };

    if page.is_stalled() {
        return Err(FetchError::server(format!(
            "empty page at startAt={} before reported total {}",
            offset, total
        )));
    }

    debug!(offset, total, records = page.records.len(), "Parsed page");
    Ok(page)
}

fn transport_error(err: reqwest::Error) -> FetchError {
    let what = if err.is_timeout() {
        "request timed out"
    } else if err.is_connect() {
        "connection failed"
    } else {
        "transport failure"
    };
    FetchError::Network(format!("{}: {}", what, err.without_url()))
}

/// `Retry-After` in delta-seconds form
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn truncate(body: &str) -> String {
    let body = body.trim();
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}...", cut)
    }
}
