//! Run statistics aggregation and progress reporting

use crate::types::{RunStats, TaskResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct State {
    stats: RunStats,
    /// Results folded into `avg_duration`; unaffected by later reclassification
    samples: u64,
}

/// Single owner of the run's [`RunStats`]
///
/// Every read-modify-write happens inside one critical section, so the
/// counters, the running mean, the success rate and the ETA are always
/// mutually consistent. Clones share the same state.
#[derive(Clone)]
pub struct StatsAggregator {
    state: Arc<Mutex<State>>,
}

impl StatsAggregator {
    /// Start tracking a run of `total` tasks
    pub fn new(total: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                stats: RunStats::new(total),
                samples: 0,
            })),
        }
    }

    /// Fold one task result into the statistics
    ///
    /// Successful results count as completed and failures as failed; both feed
    /// the running mean. Cancelled results only bump `cancelled`.
    pub fn record<R>(&self, result: &TaskResult<R>) {
        let mut state = self.state.lock();

        if let Some(err) = result.error()
            && err.is_cancellation()
        {
            state.stats.cancelled += 1;
            return;
        }

        let n = state.samples;
        let total_nanos =
            state.stats.avg_duration.as_nanos() * u128::from(n) + result.duration.as_nanos();
        let mean = total_nanos / (u128::from(n) + 1);
        state.stats.avg_duration = Duration::from_nanos(u64::try_from(mean).unwrap_or(u64::MAX));
        state.samples = n + 1;

        if result.is_success() {
            state.stats.completed += 1;
        } else {
            state.stats.failed += 1;
        }

        Self::refresh(&mut state.stats, Utc::now());
    }

    /// Account for tasks that were never enqueued because the run was cancelled
    pub fn record_cancelled(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.state.lock().stats.cancelled += count;
    }

    /// Reclassify one completed task as skipped (persistence declined it)
    pub fn mark_skipped(&self) {
        let mut state = self.state.lock();
        state.stats.completed = state.stats.completed.saturating_sub(1);
        state.stats.skipped += 1;
        Self::refresh(&mut state.stats, Utc::now());
    }

    /// Reclassify one completed task as failed (its record could not be written)
    pub fn mark_failed(&self) {
        let mut state = self.state.lock();
        state.stats.completed = state.stats.completed.saturating_sub(1);
        state.stats.failed += 1;
        Self::refresh(&mut state.stats, Utc::now());
    }

    /// Copy of the current statistics
    pub fn snapshot(&self) -> RunStats {
        self.state.lock().stats.clone()
    }

    /// Log a progress line every `interval` until `stop` fires
    pub fn spawn_progress_reporter(
        &self,
        interval: Duration,
        stop: CancellationToken,
    ) -> JoinHandle<()> {
        let stats = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = stats.snapshot();
                        tracing::info!(
                            finished = snapshot.finished(),
                            total = snapshot.total,
                            "{}",
                            format_progress(&snapshot)
                        );
                    }
                }
            }
        })
    }

    /// Recompute derived fields after the counters changed
    fn refresh(stats: &mut RunStats, now: DateTime<Utc>) {
        let decided = stats.completed + stats.failed;
        stats.success_rate = if decided > 0 {
            Some(stats.completed as f64 / decided as f64 * 100.0)
        } else {
            None
        };

        let done = stats.finished();
        if done == 0 {
            return;
        }
        let elapsed_ms = now
            .signed_duration_since(stats.started_at)
            .num_milliseconds()
            .max(0);
        let per_task_ms = elapsed_ms / done as i64;
        let remaining = stats.remaining() as i64;
        stats.eta = Some(now + chrono::Duration::milliseconds(per_task_ms.saturating_mul(remaining)));
    }
}

/// One-line progress report
///
/// `Progress: 40/100 (40.0%) | Success: 97.5% | Avg: 412ms | ETA: 14:03:27`
pub fn format_progress(stats: &RunStats) -> String {
    let success = stats
        .success_rate
        .map_or_else(|| "-".to_string(), |rate| format!("{rate:.1}%"));
    let eta = stats
        .eta
        .map_or_else(|| "-".to_string(), |eta| eta.format("%H:%M:%S").to_string());

    format!(
        "Progress: {}/{} ({:.1}%) | Success: {} | Avg: {}ms | ETA: {}",
        stats.finished(),
        stats.total,
        stats.progress_percent(),
        success,
        stats.avg_duration.as_millis(),
        eta
    )
}

/// Multi-line end-of-run summary
pub fn format_summary(stats: &RunStats, elapsed: Duration) -> String {
    let mut lines = vec![
        "=== Run Summary ===".to_string(),
        format!("Total:     {}", stats.total),
        format!("Completed: {}", stats.completed),
        format!("Failed:    {}", stats.failed),
        format!("Skipped:   {}", stats.skipped),
    ];
    if stats.cancelled > 0 {
        lines.push(format!("Cancelled: {}", stats.cancelled));
    }
    if let Some(rate) = stats.success_rate {
        lines.push(format!("Success rate: {rate:.1}%"));
    }
    lines.push(format!("Elapsed:   {}s", elapsed.as_secs()));
    lines.push(format!("Avg per task: {}ms", stats.avg_duration.as_millis()));
    lines.join("\n")
}
