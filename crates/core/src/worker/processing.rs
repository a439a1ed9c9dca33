//! Processing stage: `PROCESSING_QUEUED/RETRY -> PROCESSING -> COMPLETE | SKIPPED`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::stage::{claim, guarded_transition, handle_stage_failure, Guarded, PipelineContext};
use super::{StageHandler, StageOutcome, WorkerError};
use crate::config::{ProcessingConfig, QualityConfig};
use crate::fetcher::sanitize;
use crate::manifest::{FileRecord, FileStatus, MetricStatus, Stage, StageMetric, Transition};
use crate::metrics;
use crate::policy::{AcceptancePolicy, RetryPolicy, Verdict};
use crate::queue::{Delivery, QueueItem};
use crate::transform::{TransformError, TransformJob, TransformOutput, Transformer};

/// Turns raw artifacts into products and applies the quality gate.
pub struct ProcessingStage {
    ctx: PipelineContext,
    transformer: Arc<dyn Transformer>,
    retry: RetryPolicy,
    acceptance: AcceptancePolicy,
    output_dir: PathBuf,
    output_extension: String,
    cleanup_raw: bool,
    timeout: Duration,
}

impl ProcessingStage {
    pub fn new(
        config: &ProcessingConfig,
        quality: &QualityConfig,
        ctx: PipelineContext,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        Self {
            ctx,
            transformer,
            retry: RetryPolicy::from_config(&config.retry),
            acceptance: AcceptancePolicy::from_config(quality),
            output_dir: config.output_dir.clone(),
            output_extension: config.output_extension.clone(),
            cleanup_raw: config.cleanup_raw,
            timeout: config.timeout(),
        }
    }

    async fn transform(&self, job: &TransformJob) -> Result<TransformOutput, TransformError> {
        match tokio::time::timeout(self.timeout, self.transformer.transform(job)).await {
            Ok(result) => result,
            Err(_) => Err(TransformError::Timeout {
                timeout_secs: self.timeout.as_secs(),
            }),
        }
    }

    async fn on_transformed(
        &self,
        record: &FileRecord,
        output: TransformOutput,
        elapsed: f64,
    ) -> Result<StageOutcome, WorkerError> {
        let file_id = record.file_id.as_str();
        let verdict = self.acceptance.evaluate(&output.quality);
        let quality = self.acceptance.scored(&output.quality, &verdict);
        let metric = StageMetric::new(
            file_id,
            Stage::Processing,
            record.processing_attempt,
            elapsed,
            MetricStatus::Success,
        )
        .with_resources(output.resources);

        let (change, metric, outcome) = match &verdict {
            Verdict::Accept => (
                Transition::to(FileStatus::Complete)
                    .with_output_file_path(output.output_path.to_string_lossy())
                    .with_quality(quality)
                    .with_processing_duration(elapsed),
                metric,
                StageOutcome::Advanced,
            ),
            Verdict::Reject(reason) => {
                remove_file(&output.output_path).await;
                metrics::QUALITY_REJECTIONS
                    .with_label_values(&[reason.code()])
                    .inc();
                (
                    Transition::to(FileStatus::Skipped)
                        .with_skip_reason(reason.to_string())
                        .with_quality(quality)
                        .with_processing_duration(elapsed),
                    StageMetric {
                        status: MetricStatus::Skipped,
                        ..metric
                    },
                    StageOutcome::Skipped,
                )
            }
        };

        if let Guarded::Abandoned(outcome) = guarded_transition(
            &self.ctx,
            Stage::Processing,
            file_id,
            &[FileStatus::Processing],
            change,
        )? {
            return Ok(outcome);
        }
        self.ctx.recorder.record(metric);

        match verdict {
            Verdict::Accept => info!(
                "Processed {} -> {} ({:.1}s)",
                file_id,
                output.output_path.display(),
                elapsed
            ),
            Verdict::Reject(reason) => info!("Skipped {}: {}", file_id, reason),
        }
        self.cleanup(record).await;
        Ok(outcome)
    }

    /// Remove the raw artifact once the file can no longer need it.
    async fn cleanup(&self, record: &FileRecord) {
        if !self.cleanup_raw {
            return;
        }
        if let Some(raw) = &record.raw_file_path {
            let raw = Path::new(raw);
            remove_file(raw).await;
            if let Some(parent) = raw.parent() {
                // Only succeeds once the directory is empty.
                let _ = tokio::fs::remove_dir(parent).await;
            }
        }
    }
}

/// `output_dir/YYYY/MM/DD/<YYYYmmdd_HHMMSS>_<product>.<ext>`, dated by
/// acquisition time.
pub(crate) fn output_path_for(output_dir: &Path, extension: &str, record: &FileRecord) -> PathBuf {
    let name = format!(
        "{}_{}.{}",
        record.timestamp.format("%Y%m%d_%H%M%S"),
        sanitize(&record.product_type),
        extension
    );
    output_dir
        .join(record.timestamp.format("%Y/%m/%d").to_string())
        .join(name)
}

async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}

#[async_trait]
impl StageHandler for ProcessingStage {
    fn stage(&self) -> Stage {
        Stage::Processing
    }

    async fn handle(&self, delivery: &Delivery) -> Result<StageOutcome, WorkerError> {
        let task = match &delivery.item {
            QueueItem::Processing(task) => task,
            other => {
                warn!(
                    "Download item for {} on the processing queue; dropping",
                    other.file_id()
                );
                return Ok(StageOutcome::Discarded);
            }
        };

        let record = match claim(&self.ctx, Stage::Processing, &task.file_id)? {
            Guarded::Applied(record) => record,
            Guarded::Abandoned(outcome) => return Ok(outcome),
        };

        let raw_path = record
            .raw_file_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| task.raw_file_path.clone());
        let job = TransformJob {
            file_id: record.file_id.clone(),
            raw_path,
            output_path: output_path_for(&self.output_dir, &self.output_extension, &record),
            timestamp: record.timestamp,
        };
        debug!(
            "Transforming {} via {} (attempt {})",
            record.file_id,
            self.transformer.name(),
            record.processing_attempt
        );

        let started = Instant::now();
        let result = self.transform(&job).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(output) => self.on_transformed(&record, output, elapsed).await,
            Err(e) => {
                let message = e.to_string();
                self.ctx.recorder.record(
                    StageMetric::new(
                        &record.file_id,
                        Stage::Processing,
                        record.processing_attempt,
                        elapsed,
                        MetricStatus::Failed,
                    )
                    .with_error(&message),
                );
                remove_file(&job.output_path).await;

                let outcome = handle_stage_failure(
                    &self.ctx,
                    &self.retry,
                    &record,
                    Stage::Processing,
                    &message,
                    e.is_retryable(),
                )?;
                if matches!(outcome, StageOutcome::Failed { .. }) {
                    self.cleanup(&record).await;
                }
                Ok(outcome)
            }
        }
    }
}
