//! Concurrent fetch-dispatch pipeline
//!
//! One generator task feeds a bounded task queue; a fixed pool of workers
//! drains it, each acquiring a rate limiter permit before running the work
//! function, and publishes one [`TaskResult`] per task on a bounded result
//! queue. A supervisor task owns shutdown ordering:
//!
//! 1. wait for the generator (which closes the task queue on return)
//! 2. wait for every worker to drain the closed queue
//! 3. drop the last result sender, closing the result queue
//!
//! Closing the result queue is the only end-of-run signal consumers get, and
//! it never happens while a worker can still publish.

mod source;
mod worker;

#[cfg(test)]
mod tests;

pub use source::TaskSource;

use crate::config::PipelineConfig;
use crate::error::{Error, Result, TaskError};
use crate::rate_limiter::RateLimiter;
use crate::stats::StatsAggregator;
use crate::types::{RunStats, TaskResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use worker::WorkerContext;

/// Fixed-size pool of workers sharing one rate limiter and one cancellation scope
pub struct WorkerPool {
    workers: usize,
    task_queue_capacity: usize,
    result_queue_capacity: usize,
    progress_interval: Option<Duration>,
    limiter: RateLimiter,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create a pool from pipeline settings
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero workers or a zero progress interval,
    /// and [`Error::CapacityExceeded`] when either queue capacity is zero.
    pub fn new(config: &PipelineConfig, limiter: RateLimiter) -> Result<Self> {
        if config.workers == 0 {
            return Err(Error::config("pipeline.workers", "must be at least 1"));
        }
        if config.progress_interval.is_zero() {
            return Err(Error::config(
                "pipeline.progress_interval",
                "must be greater than 0",
            ));
        }
        if config.task_queue_capacity == 0 {
            return Err(Error::CapacityExceeded {
                queue: "task",
                capacity: 0,
            });
        }
        if config.result_queue_capacity == 0 {
            return Err(Error::CapacityExceeded {
                queue: "result",
                capacity: 0,
            });
        }

        Ok(Self {
            workers: config.workers,
            task_queue_capacity: config.task_queue_capacity,
            result_queue_capacity: config.result_queue_capacity,
            progress_interval: config.verbose.then_some(config.progress_interval),
            limiter,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation scope (e.g. tied to Ctrl+C)
    #[must_use]
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The token that cancels every run started by this pool
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of workers spawned per run
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start processing `urls`
    ///
    /// `work` is called once per task with the task URL and the run's
    /// cancellation token. It must bound its own running time (the fetcher's
    /// operation deadline does this); the pool never abandons a worker. A panic
    /// inside `work` becomes a [`TaskError::Panicked`] result.
    ///
    /// Results arrive in completion order, not input order.
    pub fn process<R, F, Fut>(&self, urls: Vec<String>, work: F) -> PoolRun<R>
    where
        F: Fn(String, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, TaskError>> + Send + 'static,
        R: Send + 'static,
    {
        let source = TaskSource::new(urls);
        let stats = StatsAggregator::new(source.len());
        let (task_tx, task_rx) = mpsc::channel(self.task_queue_capacity);
        let (result_tx, result_rx) = mpsc::channel(self.result_queue_capacity);

        tracing::info!(
            tasks = source.len(),
            workers = self.workers,
            rate_limit = ?self.limiter.limit(),
            "Starting worker pool"
        );

        let generator = {
            let cancel = self.cancel.clone();
            tokio::spawn(async move { source.generate(task_tx, &cancel).await })
        };

        let tasks = Arc::new(Mutex::new(task_rx));
        let work = Arc::new(work);
        let workers: Vec<JoinHandle<()>> = (0..self.workers)
            .map(|worker_id| {
                tokio::spawn(worker::run(WorkerContext {
                    worker_id,
                    tasks: Arc::clone(&tasks),
                    results: result_tx.clone(),
                    limiter: self.limiter.clone(),
                    stats: stats.clone(),
                    work: Arc::clone(&work),
                    cancel: self.cancel.clone(),
                }))
            })
            .collect();

        let reporter_stop = CancellationToken::new();
        let reporter = self
            .progress_interval
            .map(|interval| stats.spawn_progress_reporter(interval, reporter_stop.clone()));

        let supervisor = tokio::spawn(supervise(
            generator,
            workers,
            result_tx,
            stats.clone(),
            reporter_stop,
            reporter,
        ));

        PoolRun {
            results: result_rx,
            handle: RunHandle {
                supervisor,
                stats,
                cancel: self.cancel.clone(),
            },
        }
    }
}

/// Three-phase shutdown barrier
async fn supervise<R>(
    generator: JoinHandle<usize>,
    workers: Vec<JoinHandle<()>>,
    results: mpsc::Sender<TaskResult<R>>,
    stats: StatsAggregator,
    reporter_stop: CancellationToken,
    reporter: Option<JoinHandle<()>>,
) {
    match generator.await {
        Ok(unsent) => stats.record_cancelled(unsent),
        Err(e) => tracing::error!(error = %e, "Task generator aborted"),
    }
    tracing::debug!("Task generation finished");

    for handle in workers {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker aborted");
        }
    }
    tracing::debug!("All workers finished");

    drop(results);
    reporter_stop.cancel();
    if let Some(reporter) = reporter
        && let Err(e) = reporter.await
    {
        tracing::error!(error = %e, "Progress reporter aborted");
    }

    let final_stats = stats.snapshot();
    tracing::info!(
        completed = final_stats.completed,
        failed = final_stats.failed,
        cancelled = final_stats.cancelled,
        "Worker pool finished, result queue closed"
    );
}

/// A running pipeline: the result queue plus a handle on the run
pub struct PoolRun<R> {
    results: mpsc::Receiver<TaskResult<R>>,
    handle: RunHandle,
}

impl<R> PoolRun<R> {
    /// Next result, or None once the run has finished and the queue is drained
    pub async fn next_result(&mut self) -> Option<TaskResult<R>> {
        self.results.recv().await
    }

    /// Live statistics of this run
    pub fn stats(&self) -> &StatsAggregator {
        &self.handle.stats
    }

    /// Cancel the run
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Split into a result stream and the run handle
    pub fn into_parts(self) -> (ReceiverStream<TaskResult<R>>, RunHandle) {
        (ReceiverStream::new(self.results), self.handle)
    }

    /// Drain every result, then wait for shutdown to complete
    pub async fn collect(mut self) -> (Vec<TaskResult<R>>, RunStats) {
        let mut results = Vec::new();
        while let Some(result) = self.results.recv().await {
            results.push(result);
        }
        let stats = self.handle.wait().await;
        (results, stats)
    }
}

/// Handle for waiting on or cancelling a run after its results were split off
pub struct RunHandle {
    supervisor: JoinHandle<()>,
    stats: StatsAggregator,
    cancel: CancellationToken,
}

impl RunHandle {
    /// Live statistics of this run
    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    /// Cancel the run
    pub fn cancel(&self) {
        tracing::info!("Cancelling run");
        self.cancel.cancel();
    }

    /// Wait for all three shutdown phases and return the final statistics
    ///
    /// The result stream must keep being drained concurrently, otherwise
    /// workers block on a full result queue.
    pub async fn wait(self) -> RunStats {
        if let Err(e) = self.supervisor.await {
            tracing::error!(error = %e, "Pipeline supervisor aborted");
        }
        self.stats.snapshot()
    }
}
