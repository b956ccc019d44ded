//! Worker loop: dequeue, rate-limit, run the work function, publish

use crate::error::TaskError;
use crate::rate_limiter::RateLimiter;
use crate::stats::StatsAggregator;
use crate::types::{Task, TaskResult, TaskStatus};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Everything one worker needs, cloned per worker
pub(super) struct WorkerContext<R, F> {
    pub(super) worker_id: usize,
    pub(super) tasks: Arc<Mutex<mpsc::Receiver<Task>>>,
    pub(super) results: mpsc::Sender<TaskResult<R>>,
    pub(super) limiter: RateLimiter,
    pub(super) stats: StatsAggregator,
    pub(super) work: Arc<F>,
    pub(super) cancel: CancellationToken,
}

/// Process tasks until the task queue is closed and empty
///
/// After cancellation the worker keeps draining the queue, turning each
/// remaining task into a cancelled result without calling the work function,
/// so every enqueued task still yields exactly one result.
pub(super) async fn run<R, F, Fut>(ctx: WorkerContext<R, F>)
where
    F: Fn(String, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
    R: Send + 'static,
{
    tracing::debug!(worker_id = ctx.worker_id, "Worker started");
    let mut processed = 0usize;

    loop {
        let next = {
            let mut tasks = ctx.tasks.lock().await;
            tasks.recv().await
        };
        let Some(task) = next else {
            break;
        };

        let result = process(&ctx, task).await;
        processed += 1;
        publish(&ctx, result).await;
    }

    tracing::debug!(worker_id = ctx.worker_id, processed, "Worker finished");
}

async fn process<R, F, Fut>(ctx: &WorkerContext<R, F>, mut task: Task) -> TaskResult<R>
where
    F: Fn(String, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
{
    if ctx.cancel.is_cancelled() {
        return TaskResult::new(task, Err(TaskError::Cancelled), Duration::ZERO);
    }

    task.status = TaskStatus::Processing;
    task.attempts += 1;
    tracing::debug!(worker_id = ctx.worker_id, task_id = %task.id, url = %task.url, "Processing task");

    if ctx.limiter.acquire(&ctx.cancel).await.is_err() {
        return TaskResult::new(task, Err(TaskError::Cancelled), Duration::ZERO);
    }

    let start = Instant::now();
    let work = Arc::clone(&ctx.work);
    let url = task.url.clone();
    let cancel = ctx.cancel.clone();

    // The call itself sits inside the guarded future so a panic while building
    // the future is caught as well as one while polling it
    let outcome = AssertUnwindSafe(async move { (*work)(url, cancel).await })
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));

    TaskResult::new(task, outcome, start.elapsed())
}

/// Record the result and hand it to the consumer
async fn publish<R, F>(ctx: &WorkerContext<R, F>, result: TaskResult<R>) {
    match result.error() {
        None => {
            tracing::debug!(
                task_id = %result.task.id,
                duration_ms = result.duration.as_millis(),
                "Task completed"
            );
        }
        Some(e) if e.is_cancellation() => {
            tracing::debug!(task_id = %result.task.id, "Task cancelled");
        }
        Some(e) => {
            tracing::warn!(
                task_id = %result.task.id,
                url = %result.task.url,
                error = %e,
                "Task failed"
            );
        }
    }

    ctx.stats.record(&result);

    if let Err(mpsc::error::SendError(dropped)) = ctx.results.send(result).await {
        tracing::warn!(
            worker_id = ctx.worker_id,
            task_id = %dropped.task.id,
            "Result consumer gone, discarding result"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
