use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::catalog::{CatalogClient, CatalogEntry, CatalogError, QueryWindow};
use crate::config::PollerConfig;
use crate::manifest::{
    FileStatus, ManifestError, ManifestStore, NewFile, QueryLogEntry, QueryStatus, Stage,
    Transition,
};
use crate::metrics;
use crate::queue::{QueueError, QueueItem, TaskQueue};

/// Errors that fail a poll cycle.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("catalog query failed: {0}")]
    Catalog(#[from] CatalogError),

    #[error("catalog query timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// No catalog client is configured, so there is nothing to poll.
    #[error("no catalog configured")]
    NotConfigured,
}

/// Result of one successful poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollReport {
    pub polled_at: DateTime<Utc>,
    pub window: QueryWindow,
    /// Distinct files listed by the catalog.
    pub files_found: u32,
    /// Files that were not yet in the manifest and have been enqueued.
    pub files_new: u32,
    pub duration_sec: f64,
}

struct Reconciliation {
    files_found: u32,
    files_new: u32,
    first_error: Option<PollError>,
}

/// Queries the catalog and enqueues files the manifest has never seen.
///
/// Cycles never overlap: the scheduled loop and the manual trigger share
/// one lock.
pub struct DiscoveryPoller {
    config: PollerConfig,
    catalog: Arc<dyn CatalogClient>,
    manifest: Arc<dyn ManifestStore>,
    queue: Arc<dyn TaskQueue>,
    cycle_lock: Mutex<()>,
}

impl DiscoveryPoller {
    pub fn new(
        config: PollerConfig,
        catalog: Arc<dyn CatalogClient>,
        manifest: Arc<dyn ManifestStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            config,
            catalog,
            manifest,
            queue,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Run one poll cycle over the window ending `min_age` before now.
    pub async fn poll_once(&self) -> Result<PollReport, PollError> {
        let _guard = self.cycle_lock.lock().await;
        let polled_at = Utc::now();
        let window = QueryWindow::from_config(&self.config, polled_at);
        self.run_cycle(polled_at, window).await
    }

    async fn run_cycle(
        &self,
        polled_at: DateTime<Utc>,
        window: QueryWindow,
    ) -> Result<PollReport, PollError> {
        let started = Instant::now();
        debug!(
            "Polling catalog '{}' for {} .. {}",
            self.catalog.name(),
            window.start,
            window.end
        );

        let result = match tokio::time::timeout(
            self.config.query_timeout(),
            self.catalog.query(&window),
        )
        .await
        {
            Ok(Ok(entries)) => Ok(self.reconcile(entries)),
            Ok(Err(e)) => Err(PollError::Catalog(e)),
            Err(_) => Err(PollError::Timeout {
                timeout_secs: self.config.query_timeout_secs,
            }),
        };
        let duration_sec = started.elapsed().as_secs_f64();

        let (files_found, files_new, failure) = match result {
            Ok(done) => (done.files_found, done.files_new, done.first_error),
            Err(e) => (0, 0, Some(e)),
        };
        let outcome = failure.as_ref().map(|e| e.to_string());

        let entry = QueryLogEntry {
            id: None,
            query_timestamp: polled_at,
            window_start: window.start,
            window_end: window.end,
            files_found,
            files_new,
            query_duration_sec: duration_sec,
            status: if outcome.is_none() {
                QueryStatus::Success
            } else {
                QueryStatus::Failed
            },
            error_message: outcome,
        };
        if let Err(e) = self.manifest.record_query(&entry) {
            warn!("Failed to write query log entry: {}", e);
        }

        let label = if failure.is_none() { "success" } else { "failed" };
        metrics::POLL_CYCLES.with_label_values(&[label]).inc();
        metrics::POLL_DURATION
            .with_label_values(&[label])
            .observe(duration_sec);

        match failure {
            None => {
                info!(
                    "Poll cycle complete: {} found, {} new ({:.2}s)",
                    files_found, files_new, duration_sec
                );
                Ok(PollReport {
                    polled_at,
                    window,
                    files_found,
                    files_new,
                    duration_sec,
                })
            }
            Some(e) => {
                error!(
                    "Poll cycle failed ({} found, {} new): {}",
                    files_found, files_new, e
                );
                Err(e)
            }
        }
    }

    /// Insert and enqueue unknown files.
    ///
    /// A failing entry does not stop the others; the first error is kept
    /// and fails the cycle once every entry has been tried.
    fn reconcile(&self, entries: Vec<CatalogEntry>) -> Reconciliation {
        let mut seen = HashSet::new();
        let mut files_new = 0u32;
        let mut first_error = None;

        for entry in &entries {
            if !seen.insert(entry.file_id.as_str()) {
                continue;
            }
            match self.discover(entry) {
                Ok(true) => files_new += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!("Failed to enqueue {}: {}", entry.file_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        Reconciliation {
            files_found: seen.len() as u32,
            files_new,
            first_error,
        }
    }

    fn discover(&self, entry: &CatalogEntry) -> Result<bool, PollError> {
        if !self.manifest.insert_discovered(&NewFile::from(entry))? {
            debug!("Already known: {}", entry.file_id);
            return Ok(false);
        }

        let record = match self.manifest.transition(
            &entry.file_id,
            &[FileStatus::Discovered],
            Transition::to(FileStatus::Queued),
        ) {
            Ok(record) => record,
            Err(e) if e.is_stale() => {
                debug!("{} was claimed by another poller", entry.file_id);
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(item) = QueueItem::for_stage(&record, Stage::Download) {
            self.queue.push(&item, std::time::Duration::ZERO)?;
        }
        metrics::FILES_DISCOVERED.inc();
        debug!("Enqueued {} for download", entry.file_id);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::SqliteManifestStore;
    use crate::queue::{Delivery, QueueDepth, QueueName, SqliteTaskQueue};
    use crate::testing::{fixtures, MockCatalog};
    use std::time::Duration;

    fn poller(
        catalog: Arc<MockCatalog>,
    ) -> (DiscoveryPoller, Arc<SqliteManifestStore>, Arc<SqliteTaskQueue>) {
        let manifest = Arc::new(SqliteManifestStore::in_memory().unwrap());
        let queue = Arc::new(SqliteTaskQueue::in_memory(Duration::from_secs(60)).unwrap());
        let poller = DiscoveryPoller::new(
            PollerConfig::default(),
            catalog,
            manifest.clone(),
            queue.clone(),
        );
        (poller, manifest, queue)
    }

    #[tokio::test]
    async fn test_new_files_are_queued() {
        let catalog = Arc::new(MockCatalog::new());
        catalog
            .set_entries(vec![fixtures::catalog_entry("A"), fixtures::catalog_entry("B")])
            .await;
        let (poller, manifest, queue) = poller(catalog.clone());

        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.files_found, 2);
        assert_eq!(report.files_new, 2);

        let a = manifest.get("A").unwrap().unwrap();
        assert_eq!(a.status, FileStatus::Queued);
        assert!(a.queued_at.is_some());
        assert_eq!(queue.depth(QueueName::Download).unwrap().ready, 2);
        assert_eq!(catalog.query_count().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_entries_in_one_response() {
        let catalog = Arc::new(MockCatalog::new());
        catalog
            .set_entries(vec![fixtures::catalog_entry("A"), fixtures::catalog_entry("A")])
            .await;
        let (poller, _manifest, queue) = poller(catalog);

        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.files_found, 1);
        assert_eq!(report.files_new, 1);
        assert_eq!(queue.depth(QueueName::Download).unwrap().ready, 1);
    }

    #[tokio::test]
    async fn test_second_poll_is_noop() {
        let catalog = Arc::new(MockCatalog::new());
        catalog.set_entries(vec![fixtures::catalog_entry("A")]).await;
        let (poller, manifest, queue) = poller(catalog);

        poller.poll_once().await.unwrap();
        let report = poller.poll_once().await.unwrap();
        assert_eq!(report.files_found, 1);
        assert_eq!(report.files_new, 0);
        assert_eq!(queue.depth(QueueName::Download).unwrap().ready, 1);

        let queries = manifest.recent_queries(10).unwrap();
        assert_eq!(queries.len(), 2);
    }

    #[tokio::test]
    async fn test_catalog_error_is_logged_and_changes_nothing() {
        let catalog = Arc::new(MockCatalog::new());
        catalog.set_entries(vec![fixtures::catalog_entry("A")]).await;
        catalog.set_next_error(CatalogError::RateLimitExceeded).await;
        let (poller, manifest, queue) = poller(catalog);

        let err = poller.poll_once().await.unwrap_err();
        assert!(matches!(err, PollError::Catalog(CatalogError::RateLimitExceeded)));
        assert!(manifest.get("A").unwrap().is_none());
        assert_eq!(queue.depth(QueueName::Download).unwrap().total(), 0);

        let queries = manifest.recent_queries(10).unwrap();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].status, QueryStatus::Failed);
        assert!(queries[0].error_message.is_some());
    }

    /// Queue that refuses to accept items for one file.
    struct RefusingQueue {
        inner: SqliteTaskQueue,
        refused: &'static str,
    }

    impl TaskQueue for RefusingQueue {
        fn push(&self, item: &QueueItem, delay: Duration) -> Result<(), QueueError> {
            if item.file_id() == self.refused {
                return Err(QueueError::Database("disk I/O error".to_string()));
            }
            self.inner.push(item, delay)
        }

        fn pop(&self, queue: QueueName) -> Result<Option<Delivery>, QueueError> {
            self.inner.pop(queue)
        }

        fn ack(&self, delivery: &Delivery) -> Result<bool, QueueError> {
            self.inner.ack(delivery)
        }

        fn depth(&self, queue: QueueName) -> Result<QueueDepth, QueueError> {
            self.inner.depth(queue)
        }
    }

    #[tokio::test]
    async fn test_enqueue_failure_does_not_stop_remaining_entries() {
        let catalog = Arc::new(MockCatalog::new());
        catalog
            .set_entries(vec![
                fixtures::catalog_entry("A"),
                fixtures::catalog_entry("B"),
                fixtures::catalog_entry("C"),
            ])
            .await;
        let manifest = Arc::new(SqliteManifestStore::in_memory().unwrap());
        let queue = Arc::new(RefusingQueue {
            inner: SqliteTaskQueue::in_memory(Duration::from_secs(60)).unwrap(),
            refused: "B",
        });
        let poller = DiscoveryPoller::new(
            PollerConfig::default(),
            catalog,
            manifest.clone(),
            queue.clone(),
        );

        let err = poller.poll_once().await.unwrap_err();
        assert!(matches!(err, PollError::Queue(_)));

        // C is still discovered after B fails.
        assert_eq!(manifest.get("A").unwrap().unwrap().status, FileStatus::Queued);
        assert_eq!(manifest.get("C").unwrap().unwrap().status, FileStatus::Queued);
        assert_eq!(queue.depth(QueueName::Download).unwrap().ready, 2);

        let log = manifest.recent_queries(1).unwrap();
        assert_eq!(log[0].status, QueryStatus::Failed);
        assert_eq!(log[0].files_found, 3);
        assert_eq!(log[0].files_new, 2);
        assert!(log[0].error_message.as_deref().unwrap().contains("disk I/O error"));
    }

    #[tokio::test]
    async fn test_query_timeout() {
        let catalog = Arc::new(MockCatalog::new().with_delay(Duration::from_secs(5)));
        let manifest = Arc::new(SqliteManifestStore::in_memory().unwrap());
        let queue = Arc::new(SqliteTaskQueue::in_memory(Duration::from_secs(60)).unwrap());
        let config = PollerConfig {
            query_timeout_secs: 0,
            ..PollerConfig::default()
        };
        let poller = DiscoveryPoller::new(config, catalog, manifest.clone(), queue);

        let err = poller.poll_once().await.unwrap_err();
        assert!(matches!(err, PollError::Timeout { .. }));
        assert_eq!(manifest.recent_queries(1).unwrap()[0].status, QueryStatus::Failed);
    }
}
