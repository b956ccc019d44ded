//! Error types for paper-harvest
//!
//! This module separates errors by where they surface:
//! - [`Error`] - crate-level failures (configuration, I/O, startup)
//! - [`FetchError`] - terminal outcome of retrieving one URL
//! - [`TaskError`] - the error carried inside a [`crate::types::TaskResult`]
//! - [`ExtractionError`] / [`ValidationError`] - record extraction and record checks
//!
//! Per-task errors never cross task boundaries as panics or early returns; the
//! worker pool captures them in the task's result and keeps going.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for paper-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for paper-harvest
///
/// Only failures that prevent the pipeline from starting (bad configuration,
/// unreadable input list, unusable output directory) are fatal to a run.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "pipeline.workers")
        key: Option<String>,
    },

    /// A queue was configured with a capacity that cannot hold a single item
    #[error("queue capacity exceeded: {queue} queue configured with capacity {capacity}")]
    CapacityExceeded {
        /// Which queue is misconfigured ("task" or "result")
        queue: &'static str,
        /// The configured capacity
        capacity: usize,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside of a per-task fetch (e.g. building the HTTP client)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A built-in extraction pattern failed to compile
    #[error("invalid extraction pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Input URL list could not be loaded
    #[error("failed to read input list {path}: {reason}")]
    InputList {
        /// Path of the input file
        path: std::path::PathBuf,
        /// Why it could not be read
        reason: String,
    },

    /// Shutdown in progress
    #[error("run cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error bound to a specific key
    pub(crate) fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Terminal outcome of [`crate::fetcher::Fetcher::retrieve`]
///
/// `Permanent` and `InvalidRequest` are never retried. `Exhausted` wraps the
/// last transient failure once every attempt has been used.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server answered 403 or 404; retrying cannot help
    #[error("permanent HTTP {status} for {url} after {attempts} attempt(s)")]
    Permanent {
        /// The requested URL
        url: String,
        /// HTTP status code (403 or 404)
        status: u16,
        /// Attempts made (always 1 unless a transient failure came first)
        attempts: u32,
    },

    /// All attempts failed with transient errors
    #[error("max retries exceeded for {url} after {attempts} attempt(s), last error: {last}")]
    Exhausted {
        /// The requested URL
        url: String,
        /// Number of attempts made
        attempts: u32,
        /// The last observed failure
        #[source]
        last: AttemptError,
    },

    /// The run was cancelled while fetching or backing off
    #[error("fetch of {url} cancelled after {attempts} attempt(s)")]
    Cancelled {
        /// The requested URL
        url: String,
        /// Attempts started before cancellation
        attempts: u32,
    },

    /// The operation-level deadline expired
    #[error("fetch of {url} timed out after {elapsed:?} ({attempts} attempt(s))")]
    TimedOut {
        /// The requested URL
        url: String,
        /// Attempts started before the deadline
        attempts: u32,
        /// Time spent before giving up
        elapsed: Duration,
    },

    /// The request could not be built (malformed URL, bad header value)
    #[error("invalid request for {url}: {reason}")]
    InvalidRequest {
        /// The requested URL
        url: String,
        /// Why the request is invalid
        reason: String,
    },
}

impl FetchError {
    /// Number of HTTP attempts that were made before this error was produced
    pub fn attempts(&self) -> u32 {
        match self {
            FetchError::Permanent { attempts, .. }
            | FetchError::Exhausted { attempts, .. }
            | FetchError::Cancelled { attempts, .. }
            | FetchError::TimedOut { attempts, .. } => *attempts,
            FetchError::InvalidRequest { .. } => 0,
        }
    }

    /// True for failures that retrying the same request cannot fix
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FetchError::Permanent { .. } | FetchError::InvalidRequest { .. }
        )
    }
}

/// Failure of a single HTTP attempt
#[derive(Debug, Error)]
pub enum AttemptError {
    /// Connection, DNS, TLS or per-attempt timeout failure
    #[error("HTTP request failed: {0}")]
    Transport(#[source] reqwest::Error),

    /// Server answered with a status >= 400
    #[error("HTTP error: {status} {reason}")]
    Status {
        /// Numeric status code
        status: u16,
        /// Canonical reason phrase
        reason: String,
    },

    /// Response headers arrived but the body could not be read completely
    #[error("read response body failed: {0}")]
    Body(#[source] reqwest::Error),
}

/// Record extraction failures (malformed or unexpected document shape)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionError {
    /// The response body was empty
    #[error("document from {url} is empty")]
    EmptyDocument {
        /// Source URL
        url: String,
    },

    /// The document could not be interpreted as an article page
    #[error("document from {url} is not an article page: {reason}")]
    UnexpectedShape {
        /// Source URL
        url: String,
        /// What was missing or malformed
        reason: String,
    },
}

/// A record is missing mandatory fields and must not be persisted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("record {url} failed validation, missing: {}", .missing.join(", "))]
pub struct ValidationError {
    /// Source URL of the record
    pub url: String,
    /// Names of the missing mandatory fields
    pub missing: Vec<&'static str>,
}

/// Error carried inside a task result
///
/// Every per-task failure, including a panic inside the user-supplied work
/// function, is converted to one of these variants.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Retrieval failed
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The document was retrieved but could not be turned into a record
    #[error("parse failed: {0}")]
    Extraction(#[from] ExtractionError),

    /// The work function panicked; the payload message is preserved
    #[error("panic in work function: {0}")]
    Panicked(String),

    /// The run was cancelled before the task finished
    #[error("task cancelled")]
    Cancelled,

    /// Any other failure reported by the work function
    #[error("{0}")]
    Other(String),
}

impl TaskError {
    /// True when the task ended because the run was cancelled
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            TaskError::Cancelled | TaskError::Fetch(FetchError::Cancelled { .. })
        )
    }
}
