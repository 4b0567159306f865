use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::{header::RETRY_AFTER, Response, StatusCode};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// Whether a failed calendar request is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retry {
    Again,
    GiveUp,
}

impl Retry {
    /// Throttling, request timeouts and provider outages are retried; auth and lookup
    /// failures are not.
    pub fn for_status(status: StatusCode) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => Retry::Again,
            s if s.is_server_error() => Retry::Again,
            _ => Retry::GiveUp,
        }
    }

    pub fn for_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            Retry::Again
        } else {
            Retry::GiveUp
        }
    }
}

/// Capped exponential backoff. `attempts` counts the first try.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub attempts: u32,
    pub initial: Duration,
    pub ceiling: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            attempts: 4,
            initial: Duration::from_millis(500),
            ceiling: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    /// Wait before retry number `retry` (0-based). A provider `Retry-After` wins when it is
    /// longer than the computed delay, but never beyond the ceiling.
    pub fn delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let factor = 1u32.checked_shl(retry).unwrap_or(u32::MAX);
        let computed = self.initial.saturating_mul(factor);
        computed.max(retry_after.unwrap_or_default()).min(self.ceiling)
    }
}

fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub bearer_token: Option<String>,
    /// Concurrent requests allowed against one calendar.
    pub per_calendar_requests: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            bearer_token: None,
            per_calendar_requests: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalendarResponse {
    pub status: StatusCode,
    pub url: String,
    pub attempts: u32,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("calendar request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("calendar api answered {status} for {url}")]
    Status { status: u16, url: String },
    #[error("fetcher is shutting down")]
    Closed,
}

impl FetchError {
    /// Whether a later run could plausibly succeed where this one failed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request(err) => Retry::for_error(err) == Retry::Again,
            FetchError::Status { status, .. } => StatusCode::from_u16(*status)
                .map(|s| Retry::for_status(s) == Retry::Again)
                .unwrap_or(false),
            FetchError::Closed => true,
        }
    }
}

/// Calendar API client. Requests to one calendar are capped, and every request is retried
/// under the backoff policy.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    bearer_token: Option<String>,
    per_calendar_requests: usize,
    limiters: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build().context("building calendar http client")?,
            bearer_token: config.bearer_token,
            per_calendar_requests: config.per_calendar_requests.max(1),
            limiters: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn limiter(&self, calendar_id: &str) -> Arc<Semaphore> {
        let mut limiters = self.limiters.lock().await;
        limiters
            .entry(calendar_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_calendar_requests)))
            .clone()
    }

    pub async fn fetch_bytes(
        &self,
        fetch_id: Uuid,
        calendar_id: &str,
        url: &str,
        query: &[(String, String)],
    ) -> Result<CalendarResponse, FetchError> {
        let limiter = self.limiter(calendar_id).await;
        let _permit = limiter.acquire().await.map_err(|_| FetchError::Closed)?;

        let span = info_span!("calendar_request", %fetch_id, calendar_id, url);
        self.send_with_backoff(url, query).instrument(span).await
    }

    async fn send_with_backoff(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<CalendarResponse, FetchError> {
        let attempts = self.backoff.attempts.max(1);
        let mut attempt = 1;
        loop {
            let mut request = self.client.get(url).query(query);
            if let Some(token) = &self.bearer_token {
                request = request.bearer_auth(token);
            }

            let (reason, hint) = match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    let status = resp.status();
                    let url = resp.url().to_string();
                    let body = resp.bytes().await?.to_vec();
                    debug!(attempt, bytes = body.len(), "calendar page received");
                    return Ok(CalendarResponse {
                        status,
                        url,
                        attempts: attempt,
                        body,
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    if Retry::for_status(status) == Retry::GiveUp || attempt >= attempts {
                        return Err(FetchError::Status {
                            status: status.as_u16(),
                            url: resp.url().to_string(),
                        });
                    }
                    (format!("status {status}"), retry_after(&resp))
                }
                Err(err) => {
                    if Retry::for_error(&err) == Retry::GiveUp || attempt >= attempts {
                        return Err(FetchError::Request(err));
                    }
                    (err.to_string(), None)
                }
            };

            let delay = self.backoff.delay(attempt - 1, hint);
            warn!(attempt, ?delay, %reason, "calendar request failed, backing off");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
