//! Record persistence: one JSON file per record, written atomically

use crate::error::{Result, ValidationError};
use crate::parser::PaperRecord;
use crate::stats::StatsAggregator;
use crate::types::{RunStats, TaskResult};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Name of the run statistics file inside the output directory
pub const STATS_FILE: &str = "stats.json";

/// Why a record was not written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A file for this id already exists; it is never overwritten
    Duplicate,
    /// The record lacks mandatory fields
    Invalid(ValidationError),
}

/// Outcome of [`Storage::save`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written to this path
    Saved(PathBuf),
    /// Declined without touching the filesystem
    Skipped(SkipReason),
}

/// Tally of what [`Storage::consume`] did with a result stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageReport {
    /// Records written
    pub saved: usize,
    /// Records declined (duplicate or invalid)
    pub skipped: usize,
    /// Failed results plus records that could not be written
    pub failed: usize,
    /// Results of tasks cut short by cancellation
    pub cancelled: usize,
}

/// Persists records under an output directory
pub struct Storage {
    output_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open the output directory, creating it if needed
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Io`] if the directory cannot be created.
    pub async fn new(output_dir: impl Into<PathBuf>) -> Result<Self> {
        let output_dir = output_dir.into();
        tokio::fs::create_dir_all(&output_dir).await?;
        Ok(Self {
            output_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory records are written to
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// File a record with this id is stored at
    ///
    /// The id is percent-encoded, so DOIs (which contain `/`) map to a single
    /// file name and distinct ids never share one.
    pub fn record_path(&self, id: &str) -> PathBuf {
        self.output_dir.join(format!("{}.json", urlencoding::encode(id)))
    }

    /// Persist one record
    ///
    /// Invalid records and ids already on disk are skipped. Saves are
    /// serialized, so the existence check and the write cannot interleave with
    /// another save.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails; the temporary file
    /// is removed and no existing record is touched.
    pub async fn save(&self, record: &PaperRecord) -> Result<SaveOutcome> {
        if let Err(invalid) = record.validate() {
            tracing::debug!(url = %record.url, error = %invalid, "Skipping invalid record");
            return Ok(SaveOutcome::Skipped(SkipReason::Invalid(invalid)));
        }

        let path = self.record_path(&record.id);
        let _guard = self.write_lock.lock().await;

        if tokio::fs::try_exists(&path).await? {
            tracing::debug!(path = %path.display(), "Record already exists, skipping");
            return Ok(SaveOutcome::Skipped(SkipReason::Duplicate));
        }

        let mut json = serde_json::to_vec_pretty(record)?;
        json.push(b'\n');
        write_atomic(&path, &json).await?;

        tracing::debug!(id = %record.id, path = %path.display(), "Saved record");
        Ok(SaveOutcome::Saved(path))
    }

    /// Persist every successful result until the stream ends
    ///
    /// Failed results are counted and not persisted. Skipped and unwritable
    /// records are reclassified in `stats`, which already counted them as
    /// completed.
    pub async fn consume<S>(&self, mut results: S, stats: &StatsAggregator) -> StorageReport
    where
        S: Stream<Item = TaskResult<PaperRecord>> + Unpin,
    {
        let mut report = StorageReport::default();

        while let Some(result) = results.next().await {
            let record = match result.outcome {
                Ok(record) => record,
                Err(e) if e.is_cancellation() => {
                    report.cancelled += 1;
                    continue;
                }
                Err(e) => {
                    tracing::debug!(url = %result.task.url, error = %e, "Not persisting failed task");
                    report.failed += 1;
                    continue;
                }
            };

            match self.save(&record).await {
                Ok(SaveOutcome::Saved(_)) => report.saved += 1,
                Ok(SaveOutcome::Skipped(reason)) => {
                    if let SkipReason::Invalid(invalid) = &reason {
                        tracing::info!(url = %record.url, error = %invalid, "Record skipped");
                    }
                    report.skipped += 1;
                    stats.mark_skipped();
                }
                Err(e) => {
                    tracing::error!(url = %record.url, error = %e, "Failed to save record");
                    report.failed += 1;
                    stats.mark_failed();
                }
            }
        }

        tracing::info!(
            saved = report.saved,
            skipped = report.skipped,
            failed = report.failed,
            "Result stream drained"
        );
        report
    }

    /// Write the final run statistics to `stats.json`
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn write_stats(&self, stats: &RunStats) -> Result<PathBuf> {
        let finished_at = Utc::now();
        let elapsed = finished_at.signed_duration_since(stats.started_at);
        let file = StatsFile {
            total: stats.total,
            completed: stats.completed,
            failed: stats.failed,
            skipped: stats.skipped,
            cancelled: stats.cancelled,
            success_rate: stats.success_rate,
            started_at: stats.started_at,
            finished_at,
            duration: format!("{:.1}s", elapsed.num_milliseconds().max(0) as f64 / 1000.0),
            avg_duration_ms: stats.avg_duration.as_millis() as u64,
        };

        let path = self.output_dir.join(STATS_FILE);
        let mut json = serde_json::to_vec_pretty(&file)?;
        json.push(b'\n');

        let _guard = self.write_lock.lock().await;
        write_atomic(&path, &json).await?;
        tracing::info!(path = %path.display(), "Run statistics written");
        Ok(path)
    }
}

#[derive(Serialize)]
struct StatsFile {
    total: usize,
    completed: usize,
    failed: usize,
    skipped: usize,
    cancelled: usize,
    success_rate: Option<f64>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    duration: String,
    avg_duration_ms: u64,
}

/// Write to `<path>.tmp`, then rename over `path`
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let written = async {
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use crate::parser::Author;
    use crate::types::Task;
    use std::time::Duration;
    use tempfile::tempdir;

    fn valid_record(url: &str) -> PaperRecord {
        let mut record = PaperRecord::new(url);
        record.title_cn = Some("钒钛磁铁矿冶炼研究".to_string());
        record.journal_cn = Some("钢铁钒钛".to_string());
        record.authors.push(Author {
            name: "张三".to_string(),
            affiliation: None,
            order: 1,
        });
        record
    }

    fn result(url: &str, outcome: std::result::Result<PaperRecord, TaskError>) -> TaskResult<PaperRecord> {
        TaskResult::new(Task::new(url), outcome, Duration::from_millis(5))
    }

    #[tokio::test]
    async fn saves_pretty_json_without_leftover_temp_file() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path().join("out")).await.unwrap();
        let record = valid_record("https://h/article/id/abc-123");

        let outcome = storage.save(&record).await.unwrap();
        let path = dir.path().join("out").join("abc-123.json");
        assert_eq!(outcome, SaveOutcome::Saved(path.clone()));

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\n  \"id\": \"abc-123\""));
        assert!(contents.contains("钢铁钒钛"), "non-ASCII text is written verbatim");
        let parsed: PaperRecord = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed, record);

        assert!(!dir.path().join("out").join("abc-123.json.tmp").exists());
    }

    #[tokio::test]
    async fn existing_record_is_never_overwritten() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let path = storage.record_path("abc-123");
        std::fs::write(&path, "original").unwrap();

        let outcome = storage
            .save(&valid_record("https://h/article/id/abc-123"))
            .await
            .unwrap();

        assert_eq!(outcome, SaveOutcome::Skipped(SkipReason::Duplicate));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "original");
    }

    #[tokio::test]
    async fn invalid_record_is_skipped_without_a_file() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let record = PaperRecord::new("https://h/article/id/empty");

        let outcome = storage.save(&record).await.unwrap();

        match outcome {
            SaveOutcome::Skipped(SkipReason::Invalid(err)) => {
                assert!(err.missing.contains(&"title_cn"));
            }
            other => panic!("expected invalid skip, got {other:?}"),
        }
        assert!(!storage.record_path("empty").exists());
    }

    #[tokio::test]
    async fn doi_ids_are_encoded_for_file_names() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let record = valid_record("https://h/cn/article/doi/10.7513/x.1");

        let outcome = storage.save(&record).await.unwrap();

        assert_eq!(
            outcome,
            SaveOutcome::Saved(dir.path().join("10.7513%2Fx.1.json"))
        );
        let saved: PaperRecord =
            serde_json::from_slice(&std::fs::read(dir.path().join("10.7513%2Fx.1.json")).unwrap())
                .unwrap();
        assert_eq!(saved.id, "10.7513/x.1");
    }

    #[tokio::test]
    async fn ids_differing_only_in_separator_get_distinct_files() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();

        for url in [
            "https://h/cn/article/doi/10.77/x.1",
            "https://h/cn/article/doi/10.77_x.1",
            "https://h/cn/article/doi/10.77%2Fx.1",
            "https://h/cn/article/doi/10.77\\x.1",
        ] {
            let outcome = storage.save(&valid_record(url)).await.unwrap();
            assert!(matches!(outcome, SaveOutcome::Saved(_)), "{url}: {outcome:?}");
        }

        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 4);
    }

    #[tokio::test]
    async fn write_failure_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("gone");
        let storage = Storage::new(&out).await.unwrap();
        std::fs::remove_dir(&out).unwrap();

        let err = storage
            .save(&valid_record("https://h/article/id/abc-123"))
            .await;

        assert!(err.is_err());
        assert!(!out.join("abc-123.json.tmp").exists());
    }

    #[tokio::test]
    async fn consume_reclassifies_skips_and_counts_failures() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();

        let results = vec![
            result("https://h/article/id/a", Ok(valid_record("https://h/article/id/a"))),
            result("https://h/article/id/a", Ok(valid_record("https://h/article/id/a"))),
            result("https://h/article/id/b", Ok(PaperRecord::new("https://h/article/id/b"))),
            result(
                "https://h/article/id/c",
                Err(TaskError::Other("parse failed".to_string())),
            ),
            result("https://h/article/id/d", Err(TaskError::Cancelled)),
        ];

        let stats = StatsAggregator::new(results.len());
        for r in &results {
            stats.record(r);
        }

        let report = storage
            .consume(futures::stream::iter(results), &stats)
            .await;

        assert_eq!(
            report,
            StorageReport {
                saved: 1,
                skipped: 2,
                failed: 1,
                cancelled: 1,
            }
        );

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.skipped, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.finished(), snapshot.total);
    }

    #[tokio::test]
    async fn stats_file_has_run_summary_fields() {
        let dir = tempdir().unwrap();
        let storage = Storage::new(dir.path()).await.unwrap();
        let stats = StatsAggregator::new(2);
        stats.record(&result(
            "https://h/article/id/a",
            Ok(valid_record("https://h/article/id/a")),
        ));
        stats.record_cancelled(1);

        let path = storage.write_stats(&stats.snapshot()).await.unwrap();
        assert_eq!(path, dir.path().join(STATS_FILE));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["total"], 2);
        assert_eq!(json["completed"], 1);
        assert_eq!(json["cancelled"], 1);
        assert_eq!(json["success_rate"], 100.0);
        assert_eq!(json["avg_duration_ms"], 5);
        assert!(json["finished_at"].is_string());
        assert!(json["duration"].as_str().unwrap().ends_with('s'));
    }
}
