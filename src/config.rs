//! Configuration types for paper-harvest

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Desktop browser User-Agent sent with every request
///
/// Several publisher sites reject the default HTTP client identification.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Default `Accept` header value (matches a desktop Chrome navigation request)
pub const DEFAULT_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";

/// Default `Accept-Language` header value
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en-US;q=0.8,en;q=0.7";

/// Worker pool and queue configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of concurrent workers (default: 20)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Aggregate request ceiling in requests per second, burst equal to the rate (default: 5)
    ///
    /// 0 disables rate limiting.
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u32,

    /// Capacity of the bounded task queue (default: 1000)
    #[serde(default = "default_queue_capacity")]
    pub task_queue_capacity: usize,

    /// Capacity of the bounded result queue (default: 1000)
    #[serde(default = "default_queue_capacity")]
    pub result_queue_capacity: usize,

    /// Interval between progress log lines when verbose (default: 5 seconds)
    #[serde(default = "default_progress_interval", with = "duration_serde")]
    pub progress_interval: Duration,

    /// Enable per-task logging and periodic progress reports
    #[serde(default)]
    pub verbose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            rate_limit: default_rate_limit(),
            task_queue_capacity: default_queue_capacity(),
            result_queue_capacity: default_queue_capacity(),
            progress_interval: default_progress_interval(),
            verbose: false,
        }
    }
}

/// HTTP retrieval configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Timeout for a single HTTP attempt (default: 30 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Deadline for one whole retrieval including retries and backoff (default: 300 seconds)
    ///
    /// This bounds how long a worker can be occupied by one URL, so the pool's
    /// shutdown never waits on a stuck request.
    #[serde(default = "default_operation_timeout", with = "duration_serde")]
    pub operation_timeout: Duration,

    /// User-Agent header value
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Accept header value
    #[serde(default = "default_accept")]
    pub accept: String,

    /// Accept-Language header value
    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    /// Maximum idle keep-alive connections per host (default: 10)
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,

    /// How long idle keep-alive connections are kept (default: 90 seconds)
    #[serde(default = "default_idle_timeout", with = "duration_serde")]
    pub idle_timeout: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            operation_timeout: default_operation_timeout(),
            user_agent: default_user_agent(),
            accept: default_accept(),
            accept_language: default_accept_language(),
            max_idle_per_host: default_max_idle_per_host(),
            idle_timeout: default_idle_timeout(),
        }
    }
}

/// Retry behavior for transient failures
///
/// With the defaults, the delay after failed attempt `k` is `min(2^(k-1), 30)` seconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per URL, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay after the first failed attempt (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Output location configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving one JSON file per record (default: "data/output/all")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Write `stats.json` into the output directory when the run finishes (default: true)
    #[serde(default = "default_true")]
    pub write_stats: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            write_stats: true,
        }
    }
}

/// Top-level configuration
///
/// Every field has a default, so an empty JSON object `{}` is a valid config.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool and queues
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// HTTP retrieval
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Retry and backoff
    #[serde(default)]
    pub retry: RetryConfig,

    /// Output location
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their defaults. The loaded config is not validated;
    /// call [`Config::validate`] after applying any overrides.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("cannot read config file {}: {}", path.display(), e),
            key: None,
        })?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Check that the configuration can drive a run
    ///
    /// Zero-capacity queues are reported as [`Error::CapacityExceeded`]; every
    /// other problem is an [`Error::Config`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.workers == 0 {
            return Err(Error::config(
                "pipeline.workers",
                "workers must be greater than 0",
            ));
        }
        if self.pipeline.task_queue_capacity == 0 {
            return Err(Error::CapacityExceeded {
                queue: "task",
                capacity: 0,
            });
        }
        if self.pipeline.result_queue_capacity == 0 {
            return Err(Error::CapacityExceeded {
                queue: "result",
                capacity: 0,
            });
        }
        if self.pipeline.progress_interval.is_zero() {
            return Err(Error::config(
                "pipeline.progress_interval",
                "progress interval must be greater than 0",
            ));
        }
        if self.fetch.timeout.is_zero() {
            return Err(Error::config(
                "fetch.timeout",
                "timeout must be greater than 0",
            ));
        }
        if self.fetch.operation_timeout.is_zero() {
            return Err(Error::config(
                "fetch.operation_timeout",
                "operation timeout must be greater than 0",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "at least one attempt is required",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    20
}

fn default_rate_limit() -> u32 {
    5
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_accept() -> String {
    DEFAULT_ACCEPT.to_string()
}

fn default_accept_language() -> String {
    DEFAULT_ACCEPT_LANGUAGE.to_string()
}

fn default_max_idle_per_host() -> usize {
    10
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/output/all")
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
