//! Pieces shared by the download and processing stages.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::{StageOutcome, WorkerError};
use crate::manifest::{FileRecord, FileStatus, ManifestError, ManifestStore, Stage, Transition};
use crate::metrics;
use crate::policy::{RetryDecision, RetryPolicy};
use crate::queue::{Delivery, QueueItem, TaskQueue};
use crate::recorder::RecorderHandle;

/// Handles deliveries from one stage's queue.
#[async_trait]
pub trait StageHandler: Send + Sync {
    fn stage(&self) -> Stage;

    /// Handle one delivery.
    ///
    /// `Ok` means the delivery is done with and may be acknowledged, whatever
    /// happened to the file. `Err` leaves it for redelivery.
    async fn handle(&self, delivery: &Delivery) -> Result<StageOutcome, WorkerError>;
}

/// Stores shared by every stage worker and the reaper.
#[derive(Clone)]
pub struct PipelineContext {
    pub manifest: Arc<dyn ManifestStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub recorder: RecorderHandle,
}

impl PipelineContext {
    pub fn new(
        manifest: Arc<dyn ManifestStore>,
        queue: Arc<dyn TaskQueue>,
        recorder: RecorderHandle,
    ) -> Self {
        Self {
            manifest,
            queue,
            recorder,
        }
    }
}

/// Result of a conditional transition made on behalf of a delivery.
pub(crate) enum Guarded {
    Applied(FileRecord),
    /// The transition lost; the delivery should be acknowledged with this outcome.
    Abandoned(StageOutcome),
}

/// Apply a transition, mapping a lost race to `Duplicate` and an unknown
/// file to `Discarded`.
pub(crate) fn guarded_transition(
    ctx: &PipelineContext,
    stage: Stage,
    file_id: &str,
    expected: &[FileStatus],
    change: Transition,
) -> Result<Guarded, WorkerError> {
    let to = change.to;
    match ctx.manifest.transition(file_id, expected, change) {
        Ok(record) => Ok(Guarded::Applied(record)),
        Err(ManifestError::StaleTransition { actual, .. }) => {
            metrics::DUPLICATE_DELIVERIES
                .with_label_values(&[stage.as_str()])
                .inc();
            debug!(
                "{} is {}, not moving it to {}; dropping duplicate {} delivery",
                file_id, actual, to, stage
            );
            Ok(Guarded::Abandoned(StageOutcome::Duplicate))
        }
        Err(ManifestError::NotFound(_)) => {
            warn!("{} delivery for unknown file {}; dropping", stage, file_id);
            Ok(Guarded::Abandoned(StageOutcome::Discarded))
        }
        Err(e) => Err(e.into()),
    }
}

/// Claim a file for `stage`: `<queued>/RETRY -> <active>`.
pub(crate) fn claim(
    ctx: &PipelineContext,
    stage: Stage,
    file_id: &str,
) -> Result<Guarded, WorkerError> {
    guarded_transition(
        ctx,
        stage,
        file_id,
        &[stage.queued_status(), FileStatus::Retry],
        Transition::to(stage.active_status()),
    )
}

/// Apply the retry policy to a failed attempt of `stage`.
///
/// `record` is the record as claimed, so its attempt counter already
/// includes the failed attempt. Retries move the file to RETRY and push its
/// queue item with the backoff delay; otherwise it becomes FAILED with the
/// attempt counter raised to the cap.
pub(crate) fn handle_stage_failure(
    ctx: &PipelineContext,
    policy: &RetryPolicy,
    record: &FileRecord,
    stage: Stage,
    error_message: &str,
    retryable: bool,
) -> Result<StageOutcome, WorkerError> {
    let attempt = record.attempts(stage);
    let item = QueueItem::for_stage(record, stage);

    let reason = match (policy.decide(attempt, retryable), item) {
        (RetryDecision::Retry { delay }, Some(item)) => {
            let change = Transition::retry(stage, error_message);
            let expected = [stage.active_status()];
            if let Guarded::Abandoned(outcome) =
                guarded_transition(ctx, stage, &record.file_id, &expected, change)?
            {
                return Ok(outcome);
            }
            ctx.queue.push(&item, delay)?;

            metrics::RETRIES_SCHEDULED
                .with_label_values(&[stage.as_str()])
                .inc();
            info!(
                "{} attempt {}/{} for {} failed, retrying in {}s: {}",
                stage,
                attempt,
                policy.max_attempts,
                record.file_id,
                delay.as_secs(),
                error_message
            );
            return Ok(StageOutcome::Retried { attempt, delay });
        }
        (RetryDecision::Retry { .. }, None) => "no raw artifact recorded".to_string(),
        (RetryDecision::GiveUp { reason }, _) => reason,
    };

    let change = Transition::failed(error_message).with_attempt_floor(stage, policy.max_attempts);
    match guarded_transition(ctx, stage, &record.file_id, &[stage.active_status()], change)? {
        Guarded::Applied(failed) => {
            metrics::PERMANENT_FAILURES
                .with_label_values(&[stage.as_str()])
                .inc();
            error!(
                "{} failed permanently for {} after attempt {} ({}): {}",
                stage, record.file_id, attempt, reason, error_message
            );
            Ok(StageOutcome::Failed {
                attempt: failed.attempts(stage),
            })
        }
        Guarded::Abandoned(outcome) => Ok(outcome),
    }
}
