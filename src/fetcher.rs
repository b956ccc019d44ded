//! Document retrieval over HTTP with retry and failure classification

use crate::config::{FetchConfig, RetryConfig};
use crate::error::{AttemptError, Error, FetchError, Result};
use crate::retry::{Attempted, RetryError, retry_with_backoff};
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, HeaderMap, HeaderName, HeaderValue,
    UPGRADE_INSECURE_REQUESTS,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use url::Url;

/// A successfully retrieved document
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// The requested URL
    pub url: String,
    /// Final HTTP status (always < 400)
    pub status_code: u16,
    /// Fully read response body
    pub body: Vec<u8>,
    /// Attempts it took, including the successful one
    pub attempts: u32,
    /// Wall-clock time across all attempts and backoff
    pub duration: Duration,
}

/// Performs "retrieve document" operations
///
/// Cheap to share behind an `Arc`; the underlying `reqwest::Client` pools
/// keep-alive connections across workers.
pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
    retry: RetryConfig,
}

impl Fetcher {
    /// Create a fetcher with a browser-like default header set
    ///
    /// # Errors
    /// Returns [`Error::Config`] if a configured header value is not a valid
    /// HTTP header, or [`Error::Network`] if the client cannot be built.
    pub fn new(config: FetchConfig, retry: RetryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(browser_headers(&config)?)
            .pool_max_idle_per_host(config.max_idle_per_host)
            .pool_idle_timeout(config.idle_timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            retry,
        })
    }

    /// The retry policy this fetcher applies
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Retrieve one document
    ///
    /// Makes up to `retry.max_attempts` GET requests, each bounded by
    /// `fetch.timeout`. Transport failures, body read failures and statuses
    /// >= 400 are retried with exponential backoff, except 403 and 404 which
    /// end the operation at once. The whole operation, backoff included, is
    /// bounded by `fetch.operation_timeout` and by `cancel`.
    pub async fn retrieve(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> std::result::Result<FetchedDocument, FetchError> {
        let target = parse_target(url)?;
        let start = Instant::now();
        let started_attempts = AtomicU32::new(0);

        let operation = retry_with_backoff(&self.retry, cancel, |attempt| {
            started_attempts.store(attempt, Ordering::Relaxed);
            self.attempt(target.clone(), attempt)
        });

        let outcome = match tokio::time::timeout(self.config.operation_timeout, operation).await {
            Ok(outcome) => outcome,
            Err(_) => {
                let attempts = started_attempts.load(Ordering::Relaxed);
                tracing::warn!(url, attempts, "Fetch exceeded operation deadline");
                return Err(FetchError::TimedOut {
                    url: url.to_string(),
                    attempts,
                    elapsed: start.elapsed(),
                });
            }
        };

        match outcome {
            Ok(Attempted {
                value: (status_code, body),
                attempts,
            }) => Ok(FetchedDocument {
                url: url.to_string(),
                status_code,
                body,
                attempts,
                duration: start.elapsed(),
            }),
            Err(RetryError::Rejected {
                error: AttemptError::Status { status, .. },
                attempts,
            }) => Err(FetchError::Permanent {
                url: url.to_string(),
                status,
                attempts,
            }),
            Err(RetryError::Rejected { error, attempts })
            | Err(RetryError::Exhausted {
                last: error,
                attempts,
            }) => Err(FetchError::Exhausted {
                url: url.to_string(),
                attempts,
                last: error,
            }),
            Err(RetryError::Cancelled { attempts }) => Err(FetchError::Cancelled {
                url: url.to_string(),
                attempts,
            }),
        }
    }

    /// One GET request; the body must be read completely to count as success
    async fn attempt(
        &self,
        target: Url,
        attempt: u32,
    ) -> std::result::Result<(u16, Vec<u8>), AttemptError> {
        tracing::debug!(url = %target, attempt, max_attempts = self.retry.max_attempts, "Fetching");

        let response = self
            .client
            .get(target)
            .send()
            .await
            .map_err(AttemptError::Transport)?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(AttemptError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            });
        }

        let body = response.bytes().await.map_err(AttemptError::Body)?;
        Ok((status.as_u16(), body.to_vec()))
    }
}

/// Validate the URL before spending an attempt on it
fn parse_target(url: &str) -> std::result::Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::InvalidRequest {
        url: url.to_string(),
        reason: e.to_string(),
    })?;

    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(FetchError::InvalidRequest {
            url: url.to_string(),
            reason: format!("unsupported scheme '{other}'"),
        }),
    }
}

/// Headers of a desktop browser navigation request
///
/// User-Agent is set on the client builder; Accept-Encoding is left to reqwest
/// so compressed bodies are decoded transparently.
fn browser_headers(config: &FetchConfig) -> Result<HeaderMap> {
    let header_value = |key: &str, value: &str| {
        HeaderValue::from_str(value)
            .map_err(|e| Error::config(key, format!("invalid header value: {e}")))
    };

    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, header_value("fetch.accept", &config.accept)?);
    headers.insert(
        ACCEPT_LANGUAGE,
        header_value("fetch.accept_language", &config.accept_language)?,
    );
    headers.insert(UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("max-age=0"));
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("document"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("navigate"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("none"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-user"),
        HeaderValue::from_static("?1"),
    );
    Ok(headers)
}
