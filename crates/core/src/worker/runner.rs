//! Pipeline runner.
//!
//! Wires the pieces into background tasks:
//! - **Poller**: one loop, cycles serialized with the manual trigger
//! - **Download / processing**: a fixed pool of independent workers each
//! - **Reaper**: one loop reclaiming stuck and orphaned records

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::download::DownloadStage;
use super::pool::WorkerPool;
use super::processing::ProcessingStage;
use super::reaper::Reaper;
use super::stage::{PipelineContext, StageHandler};
use super::{PipelineStatus, WorkerError};
use crate::catalog::CatalogClient;
use crate::config::Config;
use crate::fetcher::Fetcher;
use crate::manifest::ManifestStore;
use crate::poller::{DiscoveryPoller, PollError, PollReport};
use crate::queue::{QueueName, TaskQueue};
use crate::recorder::RecorderHandle;
use crate::transform::Transformer;

#[derive(Debug, Default)]
struct LastPoll {
    report: Option<PollReport>,
    error: Option<String>,
}

impl LastPoll {
    fn update(&mut self, result: &Result<PollReport, PollError>) {
        match result {
            Ok(report) => {
                self.report = Some(report.clone());
                self.error = None;
            }
            Err(e) => self.error = Some(e.to_string()),
        }
    }
}

/// Runs the pipeline: poller, both worker pools and the reaper.
pub struct PipelineRunner {
    config: Config,
    ctx: PipelineContext,
    poller: Option<Arc<DiscoveryPoller>>,
    download: Arc<dyn StageHandler>,
    processing: Arc<dyn StageHandler>,
    reaper: Arc<Reaper>,

    // Runtime state
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    last_poll: Arc<RwLock<LastPoll>>,
}

impl PipelineRunner {
    /// Create a runner. Without a catalog the poller is disabled and
    /// [`trigger_poll`](Self::trigger_poll) fails with `NotConfigured`.
    pub fn new(
        config: Config,
        manifest: Arc<dyn ManifestStore>,
        queue: Arc<dyn TaskQueue>,
        recorder: RecorderHandle,
        catalog: Option<Arc<dyn CatalogClient>>,
        fetcher: Arc<dyn Fetcher>,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        let ctx = PipelineContext::new(manifest, queue, recorder);

        let poller = catalog.map(|catalog| {
            Arc::new(DiscoveryPoller::new(
                config.poller.clone(),
                catalog,
                Arc::clone(&ctx.manifest),
                Arc::clone(&ctx.queue),
            ))
        });
        let download: Arc<dyn StageHandler> =
            Arc::new(DownloadStage::new(&config.download, ctx.clone(), fetcher));
        let processing: Arc<dyn StageHandler> = Arc::new(ProcessingStage::new(
            &config.processing,
            &config.quality,
            ctx.clone(),
            transformer,
        ));
        let reaper = Arc::new(Reaper::new(&config, ctx.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            ctx,
            poller,
            download,
            processing,
            reaper,
            running: AtomicBool::new(false),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            last_poll: Arc::new(RwLock::new(LastPoll::default())),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Start all background tasks.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Pipeline already running");
            return;
        }

        info!("Starting pipeline");
        let mut handles = self.handles.lock().await;

        let download = WorkerPool::new(
            Arc::clone(&self.download),
            Arc::clone(&self.ctx.queue),
            self.config.download.workers,
            self.config.download.poll_interval(),
        );
        handles.extend(download.spawn(&self.shutdown_tx));

        let processing = WorkerPool::new(
            Arc::clone(&self.processing),
            Arc::clone(&self.ctx.queue),
            self.config.processing.workers,
            self.config.processing.poll_interval(),
        );
        handles.extend(processing.spawn(&self.shutdown_tx));

        match &self.poller {
            Some(poller) if self.config.poller.enabled => {
                handles.push(self.spawn_poll_loop(Arc::clone(poller)));
            }
            Some(_) => info!("Scheduled polling disabled; manual trigger only"),
            None => warn!("No catalog configured; discovery is disabled"),
        }

        if self.config.reaper.enabled {
            handles.push(self.spawn_reaper_loop());
        }

        info!(
            "Pipeline started ({} download, {} processing workers)",
            self.config.download.workers, self.config.processing.workers
        );
    }

    /// Signal every task to stop and wait for them. Workers finish their
    /// current item first.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            warn!("Pipeline not running");
            return;
        }

        info!("Stopping pipeline");
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!("Pipeline task ended abnormally: {}", e);
            }
        }

        info!("Pipeline stopped");
    }

    /// Run one discovery cycle now, outside the schedule.
    pub async fn trigger_poll(&self) -> Result<PollReport, PollError> {
        let poller = self.poller.as_ref().ok_or(PollError::NotConfigured)?;
        info!("Manual poll triggered");
        let result = poller.poll_once().await;
        self.last_poll.write().await.update(&result);
        result
    }

    pub async fn status(&self) -> Result<PipelineStatus, WorkerError> {
        let last_poll = self.last_poll.read().await;
        Ok(PipelineStatus {
            running: self.is_running(),
            download_queue: self.ctx.queue.depth(QueueName::Download)?,
            processing_queue: self.ctx.queue.depth(QueueName::Processing)?,
            status_summary: self.ctx.manifest.status_summary()?,
            last_poll: last_poll.report.clone(),
            last_poll_error: last_poll.error.clone(),
        })
    }

    fn spawn_poll_loop(&self, poller: Arc<DiscoveryPoller>) -> JoinHandle<()> {
        let last_poll = Arc::clone(&self.last_poll);
        let initial_delay = self.config.poller.initial_delay();
        let interval = self.config.poller.interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!(
                "Poll loop started (every {}s, first in {}s)",
                interval.as_secs(),
                initial_delay.as_secs()
            );
            let mut wait = initial_delay;
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(wait) => {
                        let result = poller.poll_once().await;
                        last_poll.write().await.update(&result);
                        wait = interval;
                    }
                }
            }
            info!("Poll loop stopped");
        })
    }

    fn spawn_reaper_loop(&self) -> JoinHandle<()> {
        let reaper = Arc::clone(&self.reaper);
        let interval = self.config.reaper.interval();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            info!("Reaper started (every {}s)", interval.as_secs());
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = reaper.sweep().await {
                            error!("Reaper sweep failed: {}", e);
                        }
                    }
                }
            }
            info!("Reaper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{FileStatus, SqliteManifestStore};
    use crate::queue::SqliteTaskQueue;
    use crate::recorder::create_recorder;
    use crate::testing::{fixtures, MockCatalog, MockFetcher, MockTransformer};
    use std::time::Duration;

    fn runner(
        dir: &std::path::Path,
        catalog: Option<Arc<MockCatalog>>,
    ) -> (PipelineRunner, Arc<SqliteManifestStore>) {
        let config = fixtures::test_config(dir);
        let manifest = Arc::new(SqliteManifestStore::in_memory().unwrap());
        let queue = Arc::new(SqliteTaskQueue::in_memory(Duration::from_secs(60)).unwrap());
        let (recorder, writer) = create_recorder(manifest.clone(), 64);
        tokio::spawn(writer.run());
        let runner = PipelineRunner::new(
            config,
            manifest.clone(),
            queue,
            recorder,
            catalog.map(|c| c as Arc<dyn CatalogClient>),
            Arc::new(MockFetcher::new()),
            Arc::new(MockTransformer::new()),
        );
        (runner, manifest)
    }

    #[tokio::test]
    async fn test_start_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _) = runner(dir.path(), None);

        runner.start().await;
        assert!(runner.is_running());
        assert!(runner.status().await.unwrap().running);

        runner.stop().await;
        assert!(!runner.is_running());
        assert!(runner.handles.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_trigger_poll_without_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _) = runner(dir.path(), None);

        let err = runner.trigger_poll().await.unwrap_err();
        assert!(matches!(err, PollError::NotConfigured));
    }

    #[tokio::test]
    async fn test_triggered_file_runs_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(MockCatalog::new());
        catalog.set_entries(vec![fixtures::catalog_entry("A")]).await;
        let (runner, manifest) = runner(dir.path(), Some(catalog));

        runner.start().await;
        let report = runner.trigger_poll().await.unwrap();
        assert_eq!(report.files_new, 1);

        let mut status = FileStatus::Queued;
        for _ in 0..200 {
            status = manifest.get("A").unwrap().unwrap().status;
            if status.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        runner.stop().await;

        assert_eq!(status, FileStatus::Complete);
        let snapshot = runner.status().await.unwrap();
        assert_eq!(snapshot.last_poll.unwrap().files_found, 1);
        assert!(snapshot.last_poll_error.is_none());
        assert_eq!(snapshot.download_queue.total(), 0);
        assert_eq!(snapshot.processing_queue.total(), 0);
    }
}
