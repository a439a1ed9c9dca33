//! Types for the stage workers.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::manifest::{ManifestError, StatusCount};
use crate::poller::PollReport;
use crate::queue::{QueueDepth, QueueError};

/// What handling one delivery did to its file.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// The stage finished and the file moved on.
    Advanced,
    /// The file had already moved past this stage; nothing was done.
    Duplicate,
    /// Processing finished but the acceptance policy rejected the scene.
    Skipped,
    /// The attempt failed and the file was re-enqueued.
    Retried { attempt: u32, delay: Duration },
    /// The attempt failed and the file is now FAILED.
    Failed { attempt: u32 },
    /// The delivery did not match any file or queue; dropped.
    Discarded,
}

/// Errors that leave a delivery unacknowledged, to be redelivered.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Operational snapshot of the running pipeline.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStatus {
    pub running: bool,
    pub download_queue: QueueDepth,
    pub processing_queue: QueueDepth,
    /// Status counts for files acquired in the last 24 hours.
    pub status_summary: Vec<StatusCount>,
    pub last_poll: Option<PollReport>,
    pub last_poll_error: Option<String>,
}

/// Result of one reaper sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReaperReport {
    /// In-progress records whose attempt was declared lost.
    pub reclaimed: u32,
    /// Waiting records whose queue item was pushed again.
    pub requeued: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_status_default() {
        let status = PipelineStatus::default();
        assert!(!status.running);
        assert_eq!(status.download_queue.total(), 0);
        assert!(status.last_poll.is_none());
    }

    #[test]
    fn test_error_display() {
        let err = WorkerError::Manifest(ManifestError::NotFound("F1".to_string()));
        assert!(err.to_string().starts_with("manifest error:"));
    }
}
