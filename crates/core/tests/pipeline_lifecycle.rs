//! Pipeline lifecycle integration tests.
//!
//! A file goes from catalog listing to a terminal state through the real
//! stores, with mock collaborators scripting the failures:
//! - Happy path to COMPLETE
//! - Transient download failures that eventually succeed
//! - Retries exhausted at the attempt cap
//! - Quality rejection to SKIPPED
//! - Processing retries that leave the download alone

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::Harness;
use orbitflow_core::manifest::{FileStatus, MetricStatus, QualityMetrics, Stage};
use orbitflow_core::queue::QueueName;
use orbitflow_core::testing::{fixtures, FetchFailure, TransformFailure};
use orbitflow_core::worker::{PipelineRunner, StageOutcome};
use orbitflow_core::{create_recorder, CatalogClient, MetricStore};

async fn discover(h: &Harness, file_ids: &[&str]) {
    let entries = file_ids
        .iter()
        .enumerate()
        .map(|(i, id)| fixtures::catalog_entry_at(id, i as i64 * 15))
        .collect();
    h.catalog.set_entries(entries).await;
    let report = h.poller.poll_once().await.expect("poll failed");
    assert_eq!(report.files_new as usize, file_ids.len());
}

#[tokio::test]
async fn test_happy_path_reaches_complete() {
    let h = Harness::new();
    discover(&h, &["MSG4-A"]).await;

    assert_eq!(h.download_next().await, Some(StageOutcome::Advanced));
    let record = h.record("MSG4-A");
    assert_eq!(record.status, FileStatus::ProcessingQueued);
    assert!(record.downloaded_at.is_some());
    let raw = record.raw_file_path.clone().expect("raw path recorded");
    assert!(Path::new(&raw).exists());

    assert_eq!(h.process_next().await, Some(StageOutcome::Advanced));
    let record = h.record("MSG4-A");
    assert_eq!(record.status, FileStatus::Complete);
    assert_eq!(record.download_attempt, 1);
    assert_eq!(record.processing_attempt, 1);
    assert!(record.processed_at.is_some());
    assert_eq!(record.quality.missing_data_pct, Some(2.5));

    // Stage timestamps are ordered along the lifecycle.
    assert!(record.queued_at <= record.download_started_at);
    assert!(record.download_started_at <= record.downloaded_at);
    assert!(record.downloaded_at <= record.processing_started_at);
    assert!(record.processing_started_at <= record.processed_at);

    let output = record.output_file_path.expect("output path recorded");
    assert!(Path::new(&output).exists());
    assert!(!Path::new(&raw).exists(), "raw artifact cleaned up");

    assert_eq!(h.queue_total(QueueName::Download), 0);
    assert_eq!(h.queue_total(QueueName::Processing), 0);

    let metrics = h.wait_for_metrics("MSG4-A", 2).await;
    assert_eq!(metrics.len(), 2);
    assert_eq!(metrics[0].stage, Stage::Download);
    assert_eq!(metrics[0].status, MetricStatus::Success);
    assert_eq!(metrics[1].stage, Stage::Processing);
    assert_eq!(metrics[1].resources.memory_mb, Some(256.0));
}

#[tokio::test]
async fn test_download_fails_twice_then_succeeds() {
    let h = Harness::new();
    h.fetcher
        .script_failures("MSG4-A", vec![FetchFailure::Timeout, FetchFailure::ServerError])
        .await;
    discover(&h, &["MSG4-A"]).await;

    let outcomes = h.drain().await;
    assert!(matches!(outcomes[0], StageOutcome::Retried { attempt: 1, .. }));
    assert!(matches!(outcomes[1], StageOutcome::Retried { attempt: 2, .. }));
    assert_eq!(outcomes[2], StageOutcome::Advanced);

    let record = h.record("MSG4-A");
    assert_eq!(record.status, FileStatus::Complete);
    assert_eq!(record.download_attempt, 3);
    assert_eq!(record.processing_attempt, 1);
    assert!(record.retry_stage.is_none());
    assert_eq!(h.fetcher.fetch_count("MSG4-A").await, 3);

    let metrics = h.wait_for_metrics("MSG4-A", 4).await;
    let downloads: Vec<_> = metrics
        .iter()
        .filter(|m| m.stage == Stage::Download)
        .collect();
    assert_eq!(downloads.len(), 3);
    assert_eq!(
        downloads.iter().map(|m| m.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(downloads[0].status, MetricStatus::Failed);
    assert!(downloads[0].error_message.is_some());
    assert_eq!(downloads[1].status, MetricStatus::Failed);
    assert_eq!(downloads[2].status, MetricStatus::Success);
}

#[tokio::test]
async fn test_download_retries_exhausted_at_cap() {
    let h = Harness::new();
    h.fetcher
        .script_failures(
            "MSG4-A",
            vec![
                FetchFailure::Timeout,
                FetchFailure::Timeout,
                FetchFailure::Timeout,
                FetchFailure::Timeout,
            ],
        )
        .await;
    discover(&h, &["MSG4-A"]).await;

    let outcomes = h.drain().await;
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[2], StageOutcome::Failed { attempt: 3 });

    let record = h.record("MSG4-A");
    assert_eq!(record.status, FileStatus::Failed);
    assert_eq!(record.download_attempt, 3);
    assert_eq!(record.processing_attempt, 0);
    assert!(record.error_message.is_some());
    assert_eq!(h.fetcher.fetch_count("MSG4-A").await, 3);
    assert_eq!(h.transformer.transform_count("MSG4-A").await, 0);
    assert_eq!(h.queue_total(QueueName::Download), 0);
}

#[tokio::test]
async fn test_permanent_download_failure_skips_remaining_attempts() {
    let h = Harness::new();
    h.fetcher
        .script_failures("MSG4-A", vec![FetchFailure::NotFound])
        .await;
    discover(&h, &["MSG4-A"]).await;

    let outcomes = h.drain().await;
    // The attempt counter is raised to the cap so nothing retries it.
    assert_eq!(outcomes, vec![StageOutcome::Failed { attempt: 3 }]);

    let record = h.record("MSG4-A");
    assert_eq!(record.status, FileStatus::Failed);
    assert_eq!(record.download_attempt, h.config.download.retry.max_attempts);
    assert_eq!(h.fetcher.fetch_count("MSG4-A").await, 1);
}

#[tokio::test]
async fn test_missing_data_is_skipped() {
    let h = Harness::new();
    h.transformer
        .set_quality(
            "MSG4-A",
            QualityMetrics {
                missing_data_pct: Some(60.0),
                ..fixtures::good_quality()
            },
        )
        .await;
    discover(&h, &["MSG4-A", "MSG4-B"]).await;

    h.drain().await;

    let skipped = h.record("MSG4-A");
    assert_eq!(skipped.status, FileStatus::Skipped);
    assert!(skipped
        .skip_reason
        .as_deref()
        .is_some_and(|r| r.starts_with("EXCESSIVE_MISSING_DATA")));
    assert!(skipped.output_file_path.is_none());
    assert_eq!(skipped.quality.missing_data_pct, Some(60.0));

    assert_eq!(h.record("MSG4-B").status, FileStatus::Complete);

    let metrics = h.wait_for_metrics("MSG4-A", 2).await;
    assert_eq!(metrics[1].status, MetricStatus::Skipped);
}

#[tokio::test]
async fn test_processing_retry_does_not_redownload() {
    let h = Harness::new();
    h.transformer
        .script_failures("MSG4-A", vec![TransformFailure::Crash])
        .await;
    discover(&h, &["MSG4-A"]).await;

    h.drain().await;

    let record = h.record("MSG4-A");
    assert_eq!(record.status, FileStatus::Complete);
    assert_eq!(record.download_attempt, 1);
    assert_eq!(record.processing_attempt, 2);
    assert_eq!(h.fetcher.fetch_count("MSG4-A").await, 1);
    assert_eq!(h.transformer.transform_count("MSG4-A").await, 2);
}

#[tokio::test]
async fn test_corrupt_input_fails_and_cleans_raw() {
    let h = Harness::new();
    h.transformer
        .script_failures("MSG4-A", vec![TransformFailure::CorruptInput])
        .await;
    discover(&h, &["MSG4-A"]).await;

    h.drain().await;

    let record = h.record("MSG4-A");
    assert_eq!(record.status, FileStatus::Failed);
    assert_eq!(
        record.processing_attempt,
        h.config.processing.retry.max_attempts
    );
    let raw = record.raw_file_path.expect("raw path recorded");
    assert!(!Path::new(&raw).exists());
}

#[tokio::test]
async fn test_runner_processes_many_files_concurrently() {
    let h = Harness::new();
    let ids: Vec<String> = (0..8).map(|i| format!("MSG4-{}", i)).collect();
    let entries = ids
        .iter()
        .enumerate()
        .map(|(i, id)| fixtures::catalog_entry_at(id, i as i64))
        .collect();
    h.catalog.set_entries(entries).await;

    let (recorder, writer) = create_recorder(h.manifest.clone() as Arc<dyn MetricStore>, 64);
    tokio::spawn(writer.run());
    let runner = PipelineRunner::new(
        h.config.clone(),
        h.manifest.clone(),
        h.queue.clone(),
        recorder,
        Some(h.catalog.clone() as Arc<dyn CatalogClient>),
        h.fetcher.clone(),
        h.transformer.clone(),
    );

    runner.start().await;
    let report = runner.trigger_poll().await.expect("poll failed");
    assert_eq!(report.files_new, 8);

    let mut all_done = false;
    for _ in 0..500 {
        all_done = ids
            .iter()
            .all(|id| h.record(id).status == FileStatus::Complete);
        if all_done {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    runner.stop().await;

    assert!(all_done, "not every file completed");
    for id in &ids {
        assert_eq!(h.fetcher.fetch_count(id).await, 1);
        assert_eq!(h.transformer.transform_count(id).await, 1);
    }
}
