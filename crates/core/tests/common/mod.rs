//! Shared harness for the in-process pipeline tests.
//!
//! Stages are driven one delivery at a time through `process_next`, so the
//! tests observe every hand-off without timing assumptions. The stores are
//! file-backed in a temp directory, as in production.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use orbitflow_core::config::Config;
use orbitflow_core::manifest::{FileRecord, ManifestStore, MetricStore, StageMetric};
use orbitflow_core::poller::DiscoveryPoller;
use orbitflow_core::queue::{QueueName, SqliteTaskQueue, TaskQueue};
use orbitflow_core::testing::{fixtures, MockCatalog, MockFetcher, MockTransformer};
use orbitflow_core::worker::{
    process_next, DownloadStage, PipelineContext, ProcessingStage, Reaper, StageOutcome,
};
use orbitflow_core::{create_recorder, SqliteManifestStore};

pub struct Harness {
    pub config: Config,
    pub manifest: Arc<SqliteManifestStore>,
    pub queue: Arc<SqliteTaskQueue>,
    pub catalog: Arc<MockCatalog>,
    pub fetcher: Arc<MockFetcher>,
    pub transformer: Arc<MockTransformer>,
    pub ctx: PipelineContext,
    pub poller: DiscoveryPoller,
    pub download: DownloadStage,
    pub processing: ProcessingStage,
    pub reaper: Reaper,
    pub temp_dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Build a harness from the test config after `tweak` adjusts it.
    pub fn with_config(tweak: impl FnOnce(&mut Config)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = fixtures::test_config(temp_dir.path());
        tweak(&mut config);

        let manifest = Arc::new(
            SqliteManifestStore::new(&config.database.path)
                .expect("Failed to create manifest store"),
        );
        let queue = Arc::new(
            SqliteTaskQueue::new(&config.database.path, config.queue.visibility_timeout())
                .expect("Failed to create task queue"),
        );

        let (recorder, writer) = create_recorder(
            Arc::clone(&manifest) as Arc<dyn MetricStore>,
            config.recorder.buffer_size,
        );
        tokio::spawn(writer.run());

        let ctx = PipelineContext::new(
            Arc::clone(&manifest) as Arc<dyn ManifestStore>,
            Arc::clone(&queue) as Arc<dyn TaskQueue>,
            recorder,
        );

        let catalog = Arc::new(MockCatalog::new());
        let fetcher = Arc::new(MockFetcher::new());
        let transformer = Arc::new(MockTransformer::new());

        let poller = DiscoveryPoller::new(
            config.poller.clone(),
            catalog.clone(),
            Arc::clone(&manifest) as Arc<dyn ManifestStore>,
            Arc::clone(&queue) as Arc<dyn TaskQueue>,
        );
        let download = DownloadStage::new(&config.download, ctx.clone(), fetcher.clone());
        let processing = ProcessingStage::new(
            &config.processing,
            &config.quality,
            ctx.clone(),
            transformer.clone(),
        );
        let reaper = Reaper::new(&config, ctx.clone());

        Self {
            config,
            manifest,
            queue,
            catalog,
            fetcher,
            transformer,
            ctx,
            poller,
            download,
            processing,
            reaper,
            temp_dir,
        }
    }

    pub async fn download_next(&self) -> Option<StageOutcome> {
        process_next(&self.download, self.queue.as_ref())
            .await
            .expect("download stage failed")
    }

    pub async fn process_next(&self) -> Option<StageOutcome> {
        process_next(&self.processing, self.queue.as_ref())
            .await
            .expect("processing stage failed")
    }

    /// Handle deliveries on both queues until neither has anything ready.
    pub async fn drain(&self) -> Vec<StageOutcome> {
        let mut outcomes = Vec::new();
        for _ in 0..100 {
            let mut progressed = false;
            while let Some(outcome) = self.download_next().await {
                outcomes.push(outcome);
                progressed = true;
            }
            while let Some(outcome) = self.process_next().await {
                outcomes.push(outcome);
                progressed = true;
            }
            if !progressed {
                return outcomes;
            }
        }
        panic!("pipeline did not settle: {:?}", outcomes);
    }

    pub fn record(&self, file_id: &str) -> FileRecord {
        self.manifest
            .get(file_id)
            .expect("manifest read failed")
            .unwrap_or_else(|| panic!("{} not in manifest", file_id))
    }

    pub fn queue_total(&self, queue: QueueName) -> u64 {
        self.queue.depth(queue).expect("queue depth failed").total()
    }

    /// Wait until the recorder has written at least `count` metrics for
    /// `file_id`.
    pub async fn wait_for_metrics(&self, file_id: &str, count: usize) -> Vec<StageMetric> {
        for _ in 0..200 {
            let metrics = self.manifest.metrics_for(file_id).expect("metrics read failed");
            if metrics.len() >= count {
                return metrics;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.manifest.metrics_for(file_id).expect("metrics read failed")
    }
}
