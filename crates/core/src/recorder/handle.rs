use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::manifest::{MetricStatus, StageMetric};
use crate::metrics;

/// Handle for recording stage metrics.
///
/// Cheap to clone; every worker holds one.
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::Sender<StageMetric>,
}

impl RecorderHandle {
    pub fn new(tx: mpsc::Sender<StageMetric>) -> Self {
        Self { tx }
    }

    /// Record one stage attempt without blocking.
    ///
    /// Prometheus counters are updated immediately. If the channel is full or
    /// closed the row is dropped and a warning is logged. Returns whether the
    /// row was queued for persistence.
    pub fn record(&self, metric: StageMetric) -> bool {
        let stage = metric.stage.as_str();
        let result = match metric.status {
            MetricStatus::Success => "success",
            MetricStatus::Failed => "failed",
            MetricStatus::Skipped => "skipped",
        };
        metrics::STAGE_ATTEMPTS
            .with_label_values(&[stage, result])
            .inc();
        metrics::STAGE_DURATION
            .with_label_values(&[stage])
            .observe(metric.duration_seconds);

        match self.tx.try_send(metric) {
            Ok(()) => true,
            Err(TrySendError::Full(m)) => {
                metrics::RECORDER_FAILURES
                    .with_label_values(&["channel_full"])
                    .inc();
                tracing::warn!(
                    "Metric buffer full, dropping {} metric for {} (attempt {})",
                    m.stage,
                    m.file_id,
                    m.attempt
                );
                false
            }
            Err(TrySendError::Closed(m)) => {
                metrics::RECORDER_FAILURES
                    .with_label_values(&["channel_closed"])
                    .inc();
                tracing::warn!(
                    "Metric recorder stopped, dropping {} metric for {}",
                    m.stage,
                    m.file_id
                );
                false
            }
        }
    }
}
