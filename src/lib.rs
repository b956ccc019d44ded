//! # paper-harvest
//!
//! Concurrent, rate-limited harvester for academic article metadata.
//!
//! ## Design Philosophy
//!
//! paper-harvest is designed to be:
//! - **Polite** - One shared rate limiter bounds the request rate of every worker
//! - **Fault-tolerant** - Per-task failures, panics included, end up in results, never abort the run
//! - **Accountable** - Every input URL ends as completed, failed, skipped or cancelled
//! - **Library-first** - The binary is a thin wrapper over [`harvest`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use paper_harvest::{Config, harvest};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.pipeline.workers = 10;
//!     config.output.output_dir = "data/output".into();
//!
//!     let urls = vec!["https://www.gtft.cn/cn/article/id/abc-123".to_string()];
//!     let report = harvest(&config, urls, CancellationToken::new()).await?;
//!
//!     println!("saved {} records", report.storage.saved);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// HTTP document retrieval
pub mod fetcher;
/// Article metadata extraction
pub mod parser;
/// Worker pool, task generation and shutdown ordering
pub mod pipeline;
/// Shared request rate limiting
pub mod rate_limiter;
/// Retry logic with exponential backoff
pub mod retry;
/// Run statistics and progress reporting
pub mod stats;
/// Record persistence
pub mod storage;
/// Core types and data structures
pub mod types;

// Re-export commonly used types
pub use config::{Config, FetchConfig, OutputConfig, PipelineConfig, RetryConfig};
pub use error::{Error, FetchError, Result, TaskError};
pub use fetcher::{FetchedDocument, Fetcher};
pub use parser::{ArticleParser, Author, PaperRecord};
pub use pipeline::{PoolRun, RunHandle, TaskSource, WorkerPool};
pub use rate_limiter::RateLimiter;
pub use stats::StatsAggregator;
pub use storage::{SaveOutcome, SkipReason, Storage, StorageReport};
pub use types::{RunStats, Task, TaskId, TaskResult, TaskStatus, extract_task_id};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// What a completed [`harvest`] run produced
#[derive(Debug, Clone)]
pub struct HarvestReport {
    /// Final run statistics
    pub stats: RunStats,
    /// What persistence did with the results
    pub storage: StorageReport,
    /// Where `stats.json` was written, if enabled
    pub stats_path: Option<PathBuf>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// Fetch, parse and persist every URL
///
/// Wires a [`Fetcher`] and an [`ArticleParser`] into a [`WorkerPool`] and
/// feeds its results to [`Storage`]. Firing `cancel` stops the run gracefully;
/// the report still accounts for every URL.
///
/// # Errors
///
/// Only startup failures are returned: invalid configuration, an output
/// directory that cannot be created, or an HTTP client that cannot be built.
pub async fn harvest(
    config: &Config,
    urls: Vec<String>,
    cancel: CancellationToken,
) -> Result<HarvestReport> {
    config.validate()?;

    let storage = Storage::new(&config.output.output_dir).await?;
    let fetcher = Arc::new(Fetcher::new(config.fetch.clone(), config.retry.clone())?);
    let parser = Arc::new(ArticleParser::new()?);
    let pool = WorkerPool::new(
        &config.pipeline,
        RateLimiter::new(config.pipeline.rate_limit),
    )?
    .with_cancel_token(cancel);

    let started = Instant::now();
    let run = pool.process(urls, move |url, cancel| {
        let fetcher = Arc::clone(&fetcher);
        let parser = Arc::clone(&parser);
        async move {
            let document = fetcher.retrieve(&url, &cancel).await?;
            let record = parser.parse(&document.body, &url)?;
            Ok::<_, TaskError>(record)
        }
    });

    let (results, handle) = run.into_parts();
    let storage_report = storage.consume(results, handle.stats()).await;
    let stats = handle.wait().await;

    let stats_path = if config.output.write_stats {
        match storage.write_stats(&stats).await {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!(error = %e, "Failed to write run statistics");
                None
            }
        }
    } else {
        None
    };

    Ok(HarvestReport {
        stats,
        storage: storage_report,
        stats_path,
        elapsed: started.elapsed(),
    })
}

/// Run [`harvest`], stopping it gracefully on SIGTERM or SIGINT
///
/// A signal cancels the run; in-flight tasks finish or are cut short by
/// cancellation and the returned report still accounts for every URL.
pub async fn run_with_shutdown(config: &Config, urls: Vec<String>) -> Result<HarvestReport> {
    let cancel = CancellationToken::new();
    let listener = cancel_on_shutdown_signal(cancel.clone());
    let report = harvest(config, urls, cancel).await;
    listener.abort();
    report
}

/// Cancel `cancel` when the process receives SIGTERM or SIGINT (Ctrl+C)
///
/// Returns the spawned listener; abort it once the run has finished.
///
/// # Example
///
/// ```no_run
/// use paper_harvest::{Config, harvest, cancel_on_shutdown_signal};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(urls: Vec<String>) -> paper_harvest::Result<()> {
/// let cancel = CancellationToken::new();
/// let listener = cancel_on_shutdown_signal(cancel.clone());
/// let _report = harvest(&Config::default(), urls, cancel).await?;
/// listener.abort();
/// # Ok(())
/// # }
/// ```
pub fn cancel_on_shutdown_signal(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = wait_for_signal() => {
                tracing::info!("Stopping run, waiting for in-flight tasks");
                cancel.cancel();
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register signal handlers, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received Ctrl+C signal");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
            std::future::pending::<()>().await;
        }
    }
}
