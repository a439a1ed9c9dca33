use std::sync::Arc;

use tokio::sync::mpsc;

use super::RecorderHandle;
use crate::manifest::{MetricStore, StageMetric};
use crate::metrics;

/// Background task that drains recorded metrics into the store.
pub struct RecorderWriter {
    rx: mpsc::Receiver<StageMetric>,
    store: Arc<dyn MetricStore>,
}

impl RecorderWriter {
    pub fn new(rx: mpsc::Receiver<StageMetric>, store: Arc<dyn MetricStore>) -> Self {
        Self { rx, store }
    }

    /// Consume metrics until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("Metric recorder started");

        while let Some(metric) = self.rx.recv().await {
            if let Err(e) = self.store.append_metric(&metric) {
                metrics::RECORDER_FAILURES.with_label_values(&["store"]).inc();
                tracing::warn!(
                    "Failed to record {} metric for {}: {}",
                    metric.stage,
                    metric.file_id,
                    e
                );
            }
        }

        tracing::info!("Metric recorder shutting down");
    }
}

/// Create a recorder pair.
///
/// Spawn the writer with `tokio::spawn(writer.run())` and clone the handle
/// into every worker.
pub fn create_recorder(
    store: Arc<dyn MetricStore>,
    buffer_size: usize,
) -> (RecorderHandle, RecorderWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (RecorderHandle::new(tx), RecorderWriter::new(rx, store))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::manifest::{ManifestError, MetricStatus, Stage};

    struct MockStore {
        rows: Mutex<Vec<StageMetric>>,
        should_fail: bool,
    }

    impl MockStore {
        fn new() -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
                should_fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
                should_fail: true,
            }
        }
    }

    impl MetricStore for MockStore {
        fn append_metric(&self, metric: &StageMetric) -> Result<i64, ManifestError> {
            if self.should_fail {
                return Err(ManifestError::Database("Mock failure".to_string()));
            }
            let mut rows = self.rows.lock().unwrap();
            rows.push(metric.clone());
            Ok(rows.len() as i64)
        }

        fn metrics_for(&self, file_id: &str) -> Result<Vec<StageMetric>, ManifestError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|m| m.file_id == file_id)
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn test_writer_stores_metrics() {
        let store = Arc::new(MockStore::new());
        let (handle, writer) = create_recorder(store.clone(), 16);
        let task = tokio::spawn(writer.run());

        handle.record(StageMetric::new("F1", Stage::Download, 1, 3.0, MetricStatus::Failed).with_error("timeout"));
        handle.record(StageMetric::new("F1", Stage::Download, 2, 4.0, MetricStatus::Success));
        drop(handle);
        task.await.unwrap();

        let rows = store.metrics_for("F1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].error_message.as_deref(), Some("timeout"));
        assert_eq!(rows[1].attempt, 2);
    }

    #[tokio::test]
    async fn test_writer_survives_store_errors() {
        let store = Arc::new(MockStore::failing());
        let (handle, writer) = create_recorder(store, 4);
        let task = tokio::spawn(writer.run());

        assert!(handle.record(StageMetric::new("F1", Stage::Processing, 1, 1.0, MetricStatus::Success)));
        drop(handle);

        tokio_test::assert_ok!(task.await);
    }
}
