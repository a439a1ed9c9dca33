//! Timeout-based recovery of records that no worker is going to move.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::stage::{guarded_transition, handle_stage_failure, Guarded, PipelineContext};
use super::{ReaperReport, StageOutcome, WorkerError};
use crate::config::Config;
use crate::manifest::{FileRecord, FileStatus, MetricStatus, Stage, StageMetric, Transition};
use crate::metrics;
use crate::policy::RetryPolicy;
use crate::queue::QueueItem;

const WAITING_STATUSES: [FileStatus; 5] = [
    FileStatus::Discovered,
    FileStatus::Queued,
    FileStatus::Downloaded,
    FileStatus::ProcessingQueued,
    FileStatus::Retry,
];

/// Sweeps the manifest for stuck and orphaned records.
///
/// - DOWNLOADING/PROCESSING records idle past the stage's stuck timeout lost
///   their worker; the attempt is recorded as failed and the retry policy
///   decides what happens next.
/// - Waiting records idle past `requeue_after` may have lost their queue
///   item; it is pushed again. The queue collapses duplicates per file.
///   DISCOVERED and DOWNLOADED records are first moved to the queued state
///   of their next stage.
pub struct Reaper {
    ctx: PipelineContext,
    download_retry: RetryPolicy,
    processing_retry: RetryPolicy,
    download_stuck_after: Duration,
    processing_stuck_after: Duration,
    requeue_after: Duration,
    batch_size: usize,
}

impl Reaper {
    pub fn new(config: &Config, ctx: PipelineContext) -> Self {
        Self {
            ctx,
            download_retry: RetryPolicy::from_config(&config.download.retry),
            processing_retry: RetryPolicy::from_config(&config.processing.retry),
            download_stuck_after: config.download.stuck_timeout(),
            processing_stuck_after: config.processing.stuck_timeout(),
            requeue_after: config.reaper.requeue_after(),
            batch_size: config.reaper.batch_size,
        }
    }

    pub async fn sweep(&self) -> Result<ReaperReport, WorkerError> {
        let mut report = ReaperReport::default();

        for stage in [Stage::Download, Stage::Processing] {
            let (stuck_after, policy) = match stage {
                Stage::Download => (self.download_stuck_after, &self.download_retry),
                Stage::Processing => (self.processing_stuck_after, &self.processing_retry),
            };
            let cutoff = Utc::now() - to_chrono(stuck_after);
            let stuck =
                self.ctx
                    .manifest
                    .find_stale(&[stage.active_status()], cutoff, self.batch_size)?;

            for record in stuck {
                if self.reclaim(&record, stage, stuck_after, policy)? {
                    report.reclaimed += 1;
                }
            }
        }

        let cutoff = Utc::now() - to_chrono(self.requeue_after);
        let idle = self
            .ctx
            .manifest
            .find_stale(&WAITING_STATUSES, cutoff, self.batch_size)?;
        for record in idle {
            if self.requeue(record)? {
                report.requeued += 1;
            }
        }

        if report.reclaimed > 0 || report.requeued > 0 {
            info!(
                "Reaper: {} reclaimed, {} requeued",
                report.reclaimed, report.requeued
            );
        }
        Ok(report)
    }

    fn reclaim(
        &self,
        record: &FileRecord,
        stage: Stage,
        stuck_after: Duration,
        policy: &RetryPolicy,
    ) -> Result<bool, WorkerError> {
        let message = format!(
            "{} attempt {} abandoned: no progress for {}s",
            stage,
            record.attempts(stage),
            stuck_after.as_secs()
        );
        let idle_secs = (Utc::now() - record.updated_at).num_milliseconds() as f64 / 1000.0;

        let outcome = handle_stage_failure(&self.ctx, policy, record, stage, &message, true)?;
        if matches!(outcome, StageOutcome::Duplicate | StageOutcome::Discarded) {
            return Ok(false);
        }

        self.ctx.recorder.record(
            StageMetric::new(
                &record.file_id,
                stage,
                record.attempts(stage),
                idle_secs,
                MetricStatus::Failed,
            )
            .with_error(&message),
        );
        metrics::REAPER_ACTIONS
            .with_label_values(&["reclaimed"])
            .inc();
        warn!("Reclaimed {} from {}: {}", record.file_id, record.status, message);
        Ok(true)
    }

    fn requeue(&self, record: FileRecord) -> Result<bool, WorkerError> {
        let handoff = match record.status {
            FileStatus::Discovered => Some((Stage::Download, FileStatus::Queued)),
            FileStatus::Downloaded => Some((Stage::Processing, FileStatus::ProcessingQueued)),
            _ => None,
        };
        let record = match handoff {
            Some((stage, to)) => match guarded_transition(
                &self.ctx,
                stage,
                &record.file_id,
                &[record.status],
                Transition::to(to),
            )? {
                Guarded::Applied(record) => record,
                Guarded::Abandoned(_) => return Ok(false),
            },
            None => record,
        };

        let stage = match record.status {
            FileStatus::Queued => Stage::Download,
            FileStatus::ProcessingQueued => Stage::Processing,
            FileStatus::Retry => match record.retry_stage {
                Some(stage) => stage,
                None => {
                    warn!("{} is in RETRY without a stage; skipping", record.file_id);
                    return Ok(false);
                }
            },
            _ => return Ok(false),
        };

        let item = match QueueItem::for_stage(&record, stage) {
            Some(item) => item,
            None => {
                warn!(
                    "{} has no raw artifact to requeue for {}",
                    record.file_id, stage
                );
                return Ok(false);
            }
        };

        // Only requeue if nothing moved the record in the meantime.
        if !self.ctx.manifest.touch(&record.file_id, record.status)? {
            return Ok(false);
        }
        self.ctx.queue.push(&item, Duration::ZERO)?;

        metrics::REAPER_ACTIONS
            .with_label_values(&["requeued"])
            .inc();
        debug!("Requeued {} ({}) for {}", record.file_id, record.status, stage);
        Ok(true)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(5200))
}
