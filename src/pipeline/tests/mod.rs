// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::config::{FetchConfig, RetryConfig};
use crate::error::FetchError;
use crate::fetcher::Fetcher;
use crate::types::TaskStatus;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Instant;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pipeline_config(workers: usize, rate_limit: u32) -> PipelineConfig {
    PipelineConfig {
        workers,
        rate_limit,
        task_queue_capacity: 16,
        result_queue_capacity: 16,
        ..PipelineConfig::default()
    }
}

fn pool(workers: usize, rate_limit: u32) -> WorkerPool {
    WorkerPool::new(&pipeline_config(workers, rate_limit), RateLimiter::new(rate_limit)).unwrap()
}

fn urls(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("https://papers.test/article/id/u-{i}"))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn hundred_tasks_all_succeed() {
    let start = Instant::now();
    let run = pool(10, 5).process(urls(100), |url, _cancel| async move {
        Ok::<_, TaskError>(url.len())
    });

    let (results, stats) = run.collect().await;

    assert_eq!(results.len(), 100);
    assert_eq!(stats.total, 100);
    assert_eq!(stats.completed, 100);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.cancelled, 0);
    assert_eq!(stats.success_rate, Some(100.0));

    let ids: HashSet<_> = results.iter().map(|r| r.task.id.to_string()).collect();
    assert_eq!(ids.len(), 100, "every task yields exactly one result");
    assert!(results.iter().all(|r| r.task.status == TaskStatus::Completed));
    assert!(results.iter().all(|r| r.task.attempts == 1));

    // Burst of 5, then 5 per second for the remaining 95
    assert!(start.elapsed() >= Duration::from_secs(19));
}

#[tokio::test(start_paused = true)]
async fn one_per_second_rate_serializes_ten_workers() {
    let start = Instant::now();
    let run = pool(10, 1).process(urls(10), |_url, _cancel| async { Ok::<_, TaskError>(()) });

    let (results, stats) = run.collect().await;

    assert_eq!(results.len(), 10);
    assert_eq!(stats.completed, 10);
    assert!(
        start.elapsed() >= Duration::from_secs(9),
        "10 tasks at 1/s finished after {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn not_found_url_fails_after_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/article/id/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let fetcher = Arc::new(Fetcher::new(FetchConfig::default(), RetryConfig::default()).unwrap());
    let url = format!("{}/article/id/missing", server.uri());

    let run = pool(4, 0).process(vec![url.clone()], move |url, cancel| {
        let fetcher = Arc::clone(&fetcher);
        async move {
            let doc = fetcher.retrieve(&url, &cancel).await?;
            Ok::<_, TaskError>(doc.body.len())
        }
    });

    let (results, stats) = run.collect().await;

    assert_eq!(results.len(), 1);
    let result = &results[0];
    assert_eq!(result.task.status, TaskStatus::Failed);
    assert!(matches!(
        result.error(),
        Some(TaskError::Fetch(FetchError::Permanent {
            status: 404,
            attempts: 1,
            ..
        }))
    ));
    assert_eq!((stats.completed, stats.failed, stats.skipped), (0, 1, 0));
}

#[tokio::test]
async fn panicking_work_function_is_isolated() {
    let run = pool(2, 0).process(urls(6), |url, _cancel| async move {
        if url.ends_with("u-3") {
            panic!("malformed document at {url}");
        }
        Ok::<_, TaskError>(())
    });

    let (results, stats) = run.collect().await;

    assert_eq!(results.len(), 6);
    assert_eq!(stats.completed, 5);
    assert_eq!(stats.failed, 1);

    let panicked = results
        .iter()
        .find(|r| r.task.id.as_str() == "u-3")
        .unwrap();
    match panicked.error() {
        Some(TaskError::Panicked(msg)) => assert!(msg.contains("malformed document")),
        other => panic!("expected panic error, got {other:?}"),
    }
}

#[tokio::test]
async fn extraction_style_errors_are_not_retried_by_the_pool() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let run = pool(3, 0).process(urls(4), move |_url, _cancel| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(TaskError::Other("unexpected shape".to_string()))
        }
    });

    let (results, stats) = run.collect().await;

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(results.len(), 4);
    assert_eq!(stats.failed, 4);
    assert_eq!(stats.success_rate, Some(0.0));
}

#[tokio::test(start_paused = true)]
async fn cancellation_accounts_for_every_task() {
    let config = PipelineConfig {
        workers: 2,
        rate_limit: 0,
        task_queue_capacity: 3,
        result_queue_capacity: 4,
        ..PipelineConfig::default()
    };
    let pool = WorkerPool::new(&config, RateLimiter::new(0)).unwrap();
    let cancel = pool.cancel_token();

    let run = pool.process(urls(40), |_url, cancel: CancellationToken| async move {
        tokio::select! {
            _ = cancel.cancelled() => Err(TaskError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(1)) => Ok(()),
        }
    });

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
    });

    let cancelled_at = Instant::now() + Duration::from_millis(2500);
    let (results, stats) = run.collect().await;

    assert!(Instant::now() <= cancelled_at + Duration::from_millis(100));
    assert_eq!(stats.total, 40);
    assert_eq!(
        stats.completed + stats.failed + stats.skipped + stats.cancelled,
        40,
        "no task may go unaccounted: {stats:?}"
    );
    assert_eq!(stats.completed, 4, "two workers finish two rounds before cancel");
    assert!(stats.cancelled > 0);

    let cancelled_results = results
        .iter()
        .filter(|r| r.task.status == TaskStatus::Cancelled)
        .count();
    assert_eq!(results.len(), stats.completed + cancelled_results);
}

#[tokio::test]
async fn result_queue_closes_only_after_every_result() {
    let run = pool(8, 0).process(urls(50), |_url, _cancel| async {
        tokio::task::yield_now().await;
        Ok::<_, TaskError>(())
    });

    let (stream, handle) = run.into_parts();
    let received: Vec<_> = stream.collect().await;

    // The stream ended, so the supervisor already passed all three phases
    assert_eq!(received.len(), 50);
    let stats = handle.stats().snapshot();
    assert_eq!(stats.completed, 50);

    let final_stats = handle.wait().await;
    assert_eq!(final_stats.finished(), 50);
}

#[tokio::test]
async fn empty_input_closes_immediately() {
    let run = pool(4, 5).process(Vec::new(), |_url, _cancel| async { Ok::<_, TaskError>(()) });
    let (results, stats) = run.collect().await;

    assert!(results.is_empty());
    assert_eq!(stats.total, 0);
    assert!(stats.success_rate.is_none());
}

#[test]
fn zero_capacity_queue_is_a_configuration_error() {
    let config = PipelineConfig {
        result_queue_capacity: 0,
        ..PipelineConfig::default()
    };
    assert!(matches!(
        WorkerPool::new(&config, RateLimiter::new(5)),
        Err(Error::CapacityExceeded {
            queue: "result",
            ..
        })
    ));

    let config = PipelineConfig {
        workers: 0,
        ..PipelineConfig::default()
    };
    assert!(matches!(
        WorkerPool::new(&config, RateLimiter::new(5)),
        Err(Error::Config { .. })
    ));
}

#[test]
fn zero_progress_interval_is_rejected() {
    let config = PipelineConfig {
        progress_interval: Duration::ZERO,
        verbose: true,
        ..PipelineConfig::default()
    };
    match WorkerPool::new(&config, RateLimiter::new(5)) {
        Err(Error::Config { key, .. }) => {
            assert_eq!(key.as_deref(), Some("pipeline.progress_interval"));
        }
        Err(other) => panic!("expected config error, got {other:?}"),
        Ok(_) => panic!("zero progress interval accepted"),
    }
}

#[tokio::test(start_paused = true)]
async fn verbose_run_reports_progress_and_finishes() {
    let config = PipelineConfig {
        verbose: true,
        progress_interval: Duration::from_millis(500),
        ..pipeline_config(2, 2)
    };
    let pool = WorkerPool::new(&config, RateLimiter::new(2)).unwrap();

    let (results, stats) = pool
        .process(urls(6), |_url, _cancel| async { Ok::<_, TaskError>(()) })
        .collect()
        .await;

    assert_eq!(results.len(), 6);
    assert_eq!(stats.completed, 6);
}
