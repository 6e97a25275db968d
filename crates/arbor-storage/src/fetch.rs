//! HTTP access to remote import sources with bounded retries.

use std::time::Duration;

use anyhow::Context;
use reqwest::{header, RequestBuilder, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

/// 5xx and 429 answers are worth another attempt; other statuses are final.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

pub fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Doubles from `base_delay` on every retry, capped at `max_delay`.
    pub fn delay(&self, retry: usize) -> Duration {
        u32::try_from(retry)
            .ok()
            .and_then(|exp| 2u32.checked_pow(exp))
            .map_or(self.max_delay, |factor| {
                self.base_delay.saturating_mul(factor).min(self.max_delay)
            })
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} answered with status {status}")]
    HttpStatus { status: u16, url: String },
}

/// Result of a lightweight reachability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Reachable,
    Unreachable { reason: String },
}

impl ProbeOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeOutcome::Reachable)
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        let builder = match config.user_agent {
            Some(agent) => builder.user_agent(agent),
            None => builder,
        };
        let client = builder.build().context("building source HTTP client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    /// Checks that `url` answers without downloading its body.
    ///
    /// Servers that refuse `HEAD` are asked for the first byte with a ranged `GET`.
    pub async fn probe(&self, run_id: Uuid, source: &str, url: &str) -> ProbeOutcome {
        let span = info_span!("source_probe", %run_id, source, url);
        async {
            match self.send_with_retry(|| self.client.head(url)).await {
                Ok(_) => ProbeOutcome::Reachable,
                Err(FetchError::HttpStatus { status, .. })
                    if status == StatusCode::METHOD_NOT_ALLOWED.as_u16()
                        || status == StatusCode::NOT_IMPLEMENTED.as_u16() =>
                {
                    debug!(status, "HEAD rejected; falling back to ranged GET");
                    let ranged = || self.client.get(url).header(header::RANGE, "bytes=0-0");
                    match self.send_with_retry(ranged).await {
                        Ok(_) => ProbeOutcome::Reachable,
                        Err(err) => ProbeOutcome::Unreachable {
                            reason: err.to_string(),
                        },
                    }
                }
                Err(err) => ProbeOutcome::Unreachable {
                    reason: err.to_string(),
                },
            }
        }
        .instrument(span)
        .await
    }

    /// Starts a full `GET`; the caller streams the body.
    pub async fn open(&self, run_id: Uuid, source: &str, url: &str) -> Result<Response, FetchError> {
        let span = info_span!("source_fetch", %run_id, source, url);
        self.send_with_retry(|| self.client.get(url))
            .instrument(span)
            .await
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<Response, FetchError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retry = 0;
        loop {
            let (retryable, err) = match build().send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => (
                    is_retryable_status(resp.status()),
                    FetchError::HttpStatus {
                        status: resp.status().as_u16(),
                        url: resp.url().to_string(),
                    },
                ),
                Err(err) => (is_retryable_error(&err), FetchError::Request(err)),
            };
            if !retryable || retry >= self.backoff.max_retries {
                return Err(err);
            }
            let delay = self.backoff.delay(retry);
            warn!(error = %err, retry, ?delay, "source request failed; retrying");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(350));
        assert_eq!(policy.delay(40), Duration::from_millis(350));
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn unreachable_hosts_report_a_reason() {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_millis(500),
            user_agent: None,
            backoff: BackoffPolicy {
                max_retries: 0,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        })
        .expect("client");

        let outcome = fetcher
            .probe(Uuid::new_v4(), "sites", "http://127.0.0.1:9/sites.csv")
            .await;
        assert!(!outcome.is_reachable());
    }
}
