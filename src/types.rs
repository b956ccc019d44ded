//! Core types: tasks, results, and run statistics

use crate::error::TaskError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Path marker preceding an article UUID
const ARTICLE_ID_MARKER: &str = "/article/id/";

/// Path marker preceding an article DOI
const ARTICLE_DOI_MARKER: &str = "/article/doi/";

/// Derive a task identifier from a URL
///
/// - `.../article/id/{token}` → `{token}`
/// - `.../article/doi/{token}` → `{token}` (DOIs keep their slashes)
/// - anything else → the URL itself
///
/// The last occurrence of a marker wins. The same URL always yields the same id.
///
/// # Examples
///
/// ```
/// use paper_harvest::types::extract_task_id;
///
/// assert_eq!(extract_task_id("https://host/cn/article/id/abc-123"), "abc-123");
/// assert_eq!(extract_task_id("https://host/article/doi/10.77/x.1"), "10.77/x.1");
/// assert_eq!(extract_task_id("https://host/other"), "https://host/other");
/// ```
pub fn extract_task_id(url: &str) -> &str {
    if let Some(idx) = url.rfind(ARTICLE_ID_MARKER) {
        return &url[idx + ARTICLE_ID_MARKER.len()..];
    }
    if let Some(idx) = url.rfind(ARTICLE_DOI_MARKER) {
        return &url[idx + ARTICLE_DOI_MARKER.len()..];
    }
    url
}

/// Unique identifier for a task, derived from its URL
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Build the id for a URL using [`extract_task_id`]
    pub fn from_url(url: &str) -> Self {
        Self(extract_task_id(url).to_string())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task status
///
/// `Pending → Processing → {Completed | Failed | Cancelled}`. `Skipped` is set
/// only after processing, when the persistence layer declines the record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet picked up by a worker
    Pending,
    /// Owned by a worker that is fetching or extracting it
    Processing,
    /// Record produced
    Completed,
    /// Fetch, extraction, or the work function failed
    Failed,
    /// Rejected before persisting (duplicate on disk or invalid record)
    Skipped,
    /// Run cancelled before the task finished
    Cancelled,
}

/// One unit of work: a single input URL
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    /// Identifier derived from the URL
    pub id: TaskId,
    /// URL to retrieve
    pub url: String,
    /// Number of processing passes made (0 until a worker picks it up)
    pub attempts: u32,
    /// Current status
    pub status: TaskStatus,
    /// When the task was created
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending task for a URL
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            id: TaskId::from_url(&url),
            url,
            attempts: 0,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of processing one task
///
/// Exactly one is produced per task that enters the task queue. Immutable once
/// built; ownership moves through the result queue to a single consumer.
#[derive(Debug)]
pub struct TaskResult<R> {
    /// The task, with its final status
    pub task: Task,
    /// The record on success, or the error that ended the task
    pub outcome: Result<R, TaskError>,
    /// Time spent processing (rate limiter wait excluded)
    pub duration: Duration,
}

impl<R> TaskResult<R> {
    /// Build a result, deriving the task's final status from the outcome
    pub fn new(mut task: Task, outcome: Result<R, TaskError>, duration: Duration) -> Self {
        task.status = match &outcome {
            Ok(_) => TaskStatus::Completed,
            Err(e) if e.is_cancellation() => TaskStatus::Cancelled,
            Err(_) => TaskStatus::Failed,
        };
        Self {
            task,
            outcome,
            duration,
        }
    }

    /// The record, if the task succeeded
    pub fn payload(&self) -> Option<&R> {
        self.outcome.as_ref().ok()
    }

    /// The error, if the task failed
    pub fn error(&self) -> Option<&TaskError> {
        self.outcome.as_ref().err()
    }

    /// True when a record was produced
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Run-wide statistics snapshot
///
/// The live instance is owned by [`crate::stats::StatsAggregator`]; this is a
/// copy taken under its lock.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunStats {
    /// Number of input URLs
    pub total: usize,
    /// Tasks that produced a record (and were not later skipped)
    pub completed: usize,
    /// Tasks that ended with an error, or whose record could not be written
    pub failed: usize,
    /// Tasks whose record was declined by persistence
    pub skipped: usize,
    /// Tasks that never finished because the run was cancelled
    pub cancelled: usize,
    /// `completed / (completed + failed) * 100`; None until something finished
    pub success_rate: Option<f64>,
    /// Running mean of per-task processing time
    #[serde(with = "duration_millis")]
    pub avg_duration: Duration,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// Projected completion time; None until something finished
    pub eta: Option<DateTime<Utc>>,
}

impl RunStats {
    /// Fresh statistics for a run of `total` tasks starting now
    pub fn new(total: usize) -> Self {
        Self {
            total,
            completed: 0,
            failed: 0,
            skipped: 0,
            cancelled: 0,
            success_rate: None,
            avg_duration: Duration::ZERO,
            started_at: Utc::now(),
            eta: None,
        }
    }

    /// Tasks with a final outcome of any kind
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.skipped + self.cancelled
    }

    /// Tasks not yet accounted for
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.finished())
    }

    /// Share of tasks finished, 0.0 to 100.0
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.finished() as f64 / self.total as f64 * 100.0
    }
}

// Duration as integer milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
