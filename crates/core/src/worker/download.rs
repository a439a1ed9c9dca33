//! Download stage: `QUEUED/RETRY -> DOWNLOADING -> DOWNLOADED -> PROCESSING_QUEUED`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::stage::{claim, guarded_transition, handle_stage_failure, Guarded, PipelineContext};
use super::{StageHandler, StageOutcome, WorkerError};
use crate::config::DownloadConfig;
use crate::fetcher::{sanitize, FetchError, FetchRequest, FetchedArtifact, Fetcher};
use crate::manifest::{FileRecord, FileStatus, MetricStatus, Stage, StageMetric, Transition};
use crate::policy::RetryPolicy;
use crate::queue::{Delivery, QueueItem};

/// Fetches raw artifacts and hands files over to processing.
pub struct DownloadStage {
    ctx: PipelineContext,
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
    raw_dir: PathBuf,
    timeout: Duration,
}

impl DownloadStage {
    pub fn new(config: &DownloadConfig, ctx: PipelineContext, fetcher: Arc<dyn Fetcher>) -> Self {
        Self {
            ctx,
            fetcher,
            retry: RetryPolicy::from_config(&config.retry),
            raw_dir: config.raw_dir.clone(),
            timeout: config.timeout(),
        }
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedArtifact, FetchError> {
        match tokio::time::timeout(self.timeout, self.fetcher.fetch(request)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }

    fn on_fetched(
        &self,
        record: &FileRecord,
        raw_path: &Path,
        size_mb: f64,
        elapsed: f64,
    ) -> Result<StageOutcome, WorkerError> {
        let file_id = record.file_id.as_str();
        let change = Transition::to(FileStatus::Downloaded)
            .with_raw_file_path(raw_path.to_string_lossy())
            .with_file_size_mb(size_mb)
            .with_download_duration(elapsed);
        if let Guarded::Abandoned(outcome) = guarded_transition(
            &self.ctx,
            Stage::Download,
            file_id,
            &[FileStatus::Downloading],
            change,
        )? {
            return Ok(outcome);
        }

        self.ctx.recorder.record(StageMetric::new(
            file_id,
            Stage::Download,
            record.download_attempt,
            elapsed,
            MetricStatus::Success,
        ));

        let queued = match guarded_transition(
            &self.ctx,
            Stage::Download,
            file_id,
            &[FileStatus::Downloaded],
            Transition::to(FileStatus::ProcessingQueued),
        )? {
            Guarded::Applied(record) => record,
            Guarded::Abandoned(outcome) => return Ok(outcome),
        };

        if let Some(item) = QueueItem::for_stage(&queued, Stage::Processing) {
            self.ctx.queue.push(&item, Duration::ZERO)?;
        }

        info!(
            "Downloaded {} ({:.1} MB in {:.1}s, attempt {})",
            file_id, size_mb, elapsed, record.download_attempt
        );
        Ok(StageOutcome::Advanced)
    }
}

/// `raw_dir/YYYY/MM/DD/<file_id>/`, dated by acquisition time.
pub(crate) fn raw_dir_for(raw_dir: &Path, record: &FileRecord) -> PathBuf {
    raw_dir
        .join(record.timestamp.format("%Y/%m/%d").to_string())
        .join(sanitize(&record.file_id))
}

async fn remove_partial(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed partial download {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial download {}: {}", dir.display(), e),
    }
}

#[async_trait]
impl StageHandler for DownloadStage {
    fn stage(&self) -> Stage {
        Stage::Download
    }

    async fn handle(&self, delivery: &Delivery) -> Result<StageOutcome, WorkerError> {
        let task = match &delivery.item {
            QueueItem::Download(task) => task,
            other => {
                warn!(
                    "Processing item for {} on the download queue; dropping",
                    other.file_id()
                );
                return Ok(StageOutcome::Discarded);
            }
        };

        let record = match claim(&self.ctx, Stage::Download, &task.file_id)? {
            Guarded::Applied(record) => record,
            Guarded::Abandoned(outcome) => return Ok(outcome),
        };

        let dest_dir = raw_dir_for(&self.raw_dir, &record);
        let request = FetchRequest {
            file_id: record.file_id.clone(),
            source_locator: record.source_locator.clone(),
            dest_dir: dest_dir.clone(),
        };
        debug!(
            "Fetching {} via {} (attempt {})",
            record.file_id,
            self.fetcher.name(),
            record.download_attempt
        );

        let started = Instant::now();
        let result = self.fetch(&request).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(artifact) => self.on_fetched(&record, &artifact.path, artifact.size_mb(), elapsed),
            Err(e) => {
                let message = e.to_string();
                self.ctx.recorder.record(
                    StageMetric::new(
                        &record.file_id,
                        Stage::Download,
                        record.download_attempt,
                        elapsed,
                        MetricStatus::Failed,
                    )
                    .with_error(&message),
                );
                remove_partial(&dest_dir).await;
                handle_stage_failure(
                    &self.ctx,
                    &self.retry,
                    &record,
                    Stage::Download,
                    &message,
                    e.is_retryable(),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestStore, MetricStore, SqliteManifestStore};
    use crate::queue::{QueueName, SqliteTaskQueue, TaskQueue};
    use crate::recorder::create_recorder;
    use crate::testing::{fixtures, FetchFailure, MockFetcher};

    struct Harness {
        stage: DownloadStage,
        manifest: Arc<SqliteManifestStore>,
        queue: Arc<SqliteTaskQueue>,
        fetcher: Arc<MockFetcher>,
        _dir: tempfile::TempDir,
    }

    fn harness(fetcher: MockFetcher) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = fixtures::test_config(dir.path());
        let manifest = Arc::new(SqliteManifestStore::in_memory().unwrap());
        let queue = Arc::new(SqliteTaskQueue::in_memory(Duration::from_secs(60)).unwrap());
        let (recorder, writer) = create_recorder(manifest.clone(), 64);
        tokio::spawn(writer.run());
        let fetcher = Arc::new(fetcher);
        let ctx = PipelineContext::new(manifest.clone(), queue.clone(), recorder);
        Harness {
            stage: DownloadStage::new(&config.download, ctx, fetcher.clone()),
            manifest,
            queue,
            fetcher,
            _dir: dir,
        }
    }

    fn enqueue(h: &Harness, file_id: &str) {
        h.manifest.insert_discovered(&fixtures::new_file(file_id)).unwrap();
        let record = h
            .manifest
            .transition(file_id, &[FileStatus::Discovered], Transition::to(FileStatus::Queued))
            .unwrap();
        let item = QueueItem::for_stage(&record, Stage::Download).unwrap();
        h.queue.push(&item, Duration::ZERO).unwrap();
    }

    async fn handle_next(h: &Harness) -> StageOutcome {
        let delivery = h.queue.pop(QueueName::Download).unwrap().unwrap();
        let outcome = h.stage.handle(&delivery).await.unwrap();
        h.queue.ack(&delivery).unwrap();
        outcome
    }

    #[tokio::test]
    async fn test_successful_download_hands_over_to_processing() {
        let h = harness(MockFetcher::new());
        enqueue(&h, "A");

        assert_eq!(handle_next(&h).await, StageOutcome::Advanced);

        let record = h.manifest.get("A").unwrap().unwrap();
        assert_eq!(record.status, FileStatus::ProcessingQueued);
        assert_eq!(record.download_attempt, 1);
        assert!(record.downloaded_at.is_some());
        assert!(record.download_duration_sec.is_some());
        let raw = record.raw_file_path.unwrap();
        assert!(raw.contains("2024/06/01"));
        assert!(Path::new(&raw).exists());

        let delivery = h.queue.pop(QueueName::Processing).unwrap().unwrap();
        assert_eq!(delivery.item.file_id(), "A");
    }

    #[tokio::test]
    async fn test_redelivery_is_duplicate() {
        let h = harness(MockFetcher::new());
        enqueue(&h, "A");
        let record = h.manifest.get("A").unwrap().unwrap();
        let item = QueueItem::for_stage(&record, Stage::Download).unwrap();

        assert_eq!(handle_next(&h).await, StageOutcome::Advanced);

        h.queue.push(&item, Duration::ZERO).unwrap();
        assert_eq!(handle_next(&h).await, StageOutcome::Duplicate);
        assert_eq!(h.fetcher.fetch_count("A").await, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retries_and_cleans_up() {
        let h = harness(MockFetcher::new());
        h.fetcher.script_failures("A", vec![FetchFailure::Timeout]).await;
        enqueue(&h, "A");

        let outcome = handle_next(&h).await;
        assert!(matches!(outcome, StageOutcome::Retried { attempt: 1, .. }));

        let record = h.manifest.get("A").unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Retry);
        assert!(record.raw_file_path.is_none());

        // Zero backoff: the retry is ready immediately.
        assert_eq!(handle_next(&h).await, StageOutcome::Advanced);
        assert_eq!(h.manifest.get("A").unwrap().unwrap().download_attempt, 2);
    }

    #[tokio::test]
    async fn test_not_found_fails_permanently() {
        let h = harness(MockFetcher::new());
        h.fetcher.script_failures("A", vec![FetchFailure::NotFound]).await;
        enqueue(&h, "A");

        assert_eq!(handle_next(&h).await, StageOutcome::Failed { attempt: 3 });
        let record = h.manifest.get("A").unwrap().unwrap();
        assert_eq!(record.status, FileStatus::Failed);
        assert!(record.error_message.unwrap().contains("not found"));
        assert_eq!(h.queue.depth(QueueName::Download).unwrap().total(), 0);
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let h = harness(MockFetcher::new().with_delay(Duration::from_secs(30)));
        enqueue(&h, "A");
        let mut stage = h.stage;
        stage.timeout = Duration::from_millis(50);

        let delivery = h.queue.pop(QueueName::Download).unwrap().unwrap();
        let outcome = stage.handle(&delivery).await.unwrap();
        assert!(matches!(outcome, StageOutcome::Retried { .. }));
        assert!(h
            .manifest
            .get("A")
            .unwrap()
            .unwrap()
            .error_message
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_failed_attempt_is_recorded() {
        let h = harness(MockFetcher::new());
        h.fetcher.script_failures("A", vec![FetchFailure::ServerError]).await;
        enqueue(&h, "A");

        handle_next(&h).await;
        handle_next(&h).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let metrics = h.manifest.metrics_for("A").unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].status, MetricStatus::Failed);
        assert_eq!(metrics[0].attempt, 1);
        assert_eq!(metrics[1].status, MetricStatus::Success);
        assert_eq!(metrics[1].attempt, 2);
    }
}
