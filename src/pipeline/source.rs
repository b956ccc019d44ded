//! Task generation: input URLs to queued tasks

use crate::error::{Error, Result};
use crate::types::Task;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Feeds the bounded task queue from the input URL list
///
/// Tasks are created and enqueued in input order. A full queue suspends the
/// generator, which couples producer speed to worker speed.
pub struct TaskSource {
    urls: Vec<String>,
}

impl TaskSource {
    /// Create a source over `urls`
    pub fn new(urls: Vec<String>) -> Self {
        Self { urls }
    }

    /// Load a URL list file: one URL per line
    ///
    /// Surrounding whitespace is trimmed; blank lines and lines starting with
    /// `#` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InputList`] if the file cannot be read.
    pub fn read_urls(path: &Path) -> Result<Vec<String>> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::InputList {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Self::parse_urls(&content))
    }

    /// Parse URL list text (see [`TaskSource::read_urls`])
    pub fn parse_urls(content: &str) -> Vec<String> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    }

    /// Number of tasks this source will generate
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    /// True when there is nothing to generate
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Push one task per URL onto `queue`
    ///
    /// Returns the number of URLs that were never enqueued, which is zero
    /// unless `cancel` fired or every worker went away. The queue closes when
    /// `queue` is dropped on return, so workers see end-of-input after draining
    /// whatever was enqueued.
    pub async fn generate(self, queue: mpsc::Sender<Task>, cancel: &CancellationToken) -> usize {
        let total = self.urls.len();

        for (sent, url) in self.urls.into_iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::info!(sent, unsent = total - sent, "Task generation cancelled");
                return total - sent;
            }

            let task = Task::new(url);
            tracing::debug!(task_id = %task.id, "Enqueueing task");

            let pushed = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                pushed = queue.send(task) => Some(pushed.is_ok()),
            };

            match pushed {
                Some(true) => {}
                Some(false) => {
                    tracing::warn!(sent, "Task queue closed before generation finished");
                    return total - sent;
                }
                None => {
                    tracing::info!(sent, unsent = total - sent, "Task generation cancelled");
                    return total - sent;
                }
            }
        }

        tracing::debug!(total, "All tasks enqueued");
        0
    }
}
