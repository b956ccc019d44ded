//! End-to-end harvest runs against a mock article server
//!
//! Each test serves landing pages with wiremock, runs [`harvest`] into a
//! temporary directory and checks the records on disk together with the run
//! statistics.

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use common::{
    INCOMPLETE_PAGE, article_page, assert_all_accounted, mount_page, mount_status, test_config,
};
use paper_harvest::{PaperRecord, harvest};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn read_record(dir: &TempDir, id: &str) -> PaperRecord {
    let bytes = std::fs::read(dir.path().join(format!("{id}.json"))).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn mixed_outcomes_are_saved_skipped_or_failed() {
    let server = MockServer::start().await;
    for id in ["a1", "a2", "a3", "dup"] {
        mount_page(
            &server,
            &format!("/cn/article/id/{id}"),
            article_page(&format!("论文 {id}")),
        )
        .await;
    }
    mount_page(&server, "/cn/article/id/incomplete", INCOMPLETE_PAGE.to_string()).await;
    mount_page(&server, "/cn/article/id/blank", String::new()).await;
    mount_status(&server, "/cn/article/id/missing", 404, 1).await;
    mount_status(&server, "/cn/article/id/broken", 500, 2).await;

    let output = TempDir::new().unwrap();
    std::fs::write(output.path().join("dup.json"), "{\"id\":\"dup\"}\n").unwrap();

    let ids = [
        "a1", "a2", "a3", "dup", "incomplete", "blank", "missing", "broken",
    ];
    let urls = ids
        .iter()
        .map(|id| format!("{}/cn/article/id/{id}", server.uri()))
        .collect();

    let config = test_config(output.path());
    let report = harvest(&config, urls, CancellationToken::new())
        .await
        .unwrap();

    let stats = &report.stats;
    assert_eq!(stats.total, 8);
    assert_all_accounted(stats);
    assert_eq!(stats.completed, 3, "{stats:?}");
    assert_eq!(stats.skipped, 2, "duplicate and incomplete record: {stats:?}");
    assert_eq!(stats.failed, 3, "404, exhausted 500 and blank body: {stats:?}");
    assert_eq!(stats.cancelled, 0);
    assert_eq!(stats.success_rate, Some(50.0));

    assert_eq!(report.storage.saved, 3);
    assert_eq!(report.storage.skipped, 2);
    assert_eq!(report.storage.failed, 3);

    for id in ["a1", "a2", "a3"] {
        let record = read_record(&output, id);
        assert_eq!(record.id, id);
        assert_eq!(record.title_cn, Some(format!("论文 {id}")));
        assert_eq!(record.journal_cn.as_deref(), Some("钢铁钒钛"));
        assert_eq!(record.authors.len(), 2);
    }

    // The pre-existing file is left untouched
    let dup = std::fs::read_to_string(output.path().join("dup.json")).unwrap();
    assert_eq!(dup, "{\"id\":\"dup\"}\n");
    assert!(!output.path().join("incomplete.json").exists());
    assert!(!output.path().join("missing.json").exists());

    let stats_path = report.stats_path.expect("stats.json is written by default");
    let written: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&stats_path).unwrap()).unwrap();
    assert_eq!(written["total"], 8);
    assert_eq!(written["completed"], 3);
    assert_eq!(written["skipped"], 2);
    assert_eq!(written["failed"], 3);
    assert_eq!(written["cancelled"], 0);
}

#[tokio::test]
async fn doi_urls_are_stored_under_encoded_names() {
    let server = MockServer::start().await;
    mount_page(
        &server,
        "/cn/article/doi/10.7513/x.1",
        article_page("钒钛磁铁矿冶炼研究"),
    )
    .await;

    let output = TempDir::new().unwrap();
    let mut config = test_config(output.path());
    config.output.write_stats = false;
    config.pipeline.rate_limit = 0;

    let url = format!("{}/cn/article/doi/10.7513/x.1", server.uri());
    let report = harvest(&config, vec![url], CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.completed, 1);
    assert!(report.stats_path.is_none());
    assert!(!output.path().join("stats.json").exists());

    let record = read_record(&output, "10.7513%2Fx.1");
    assert_eq!(record.id, "10.7513/x.1");
    assert_eq!(record.doi.as_deref(), Some("10.7513/x.1"));
}

#[tokio::test]
async fn shared_rate_limit_paces_the_whole_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article_page("限速")))
        .expect(6)
        .mount(&server)
        .await;

    let output = TempDir::new().unwrap();
    let mut config = test_config(output.path());
    config.pipeline.workers = 6;
    config.pipeline.rate_limit = 2;

    let urls = (0..6)
        .map(|i| format!("{}/cn/article/id/r-{i}", server.uri()))
        .collect();

    let start = Instant::now();
    let report = harvest(&config, urls, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.stats.completed, 6);
    // Two immediately, two after one second, two after two seconds
    assert!(
        start.elapsed() >= Duration::from_millis(1900),
        "6 requests at 2/s took {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn cancellation_stops_the_run_and_accounts_for_every_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(article_page("慢"))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let output = TempDir::new().unwrap();
    let mut config = test_config(output.path());
    config.pipeline.workers = 2;

    let urls = (0..20)
        .map(|i| format!("{}/cn/article/id/s-{i}", server.uri()))
        .collect();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let report = harvest(&config, urls, cancel).await.unwrap();

    assert!(
        start.elapsed() < Duration::from_secs(3),
        "in-flight requests should be abandoned, took {:?}",
        start.elapsed()
    );
    assert_eq!(report.stats.total, 20);
    assert_all_accounted(&report.stats);
    assert_eq!(report.stats.completed, 0);
    assert_eq!(report.stats.cancelled, 20);
    assert_eq!(report.storage.saved, 0);

    // Statistics are still persisted for an interrupted run
    assert!(output.path().join("stats.json").exists());
}
