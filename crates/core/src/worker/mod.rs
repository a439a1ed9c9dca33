//! Stage workers, the reaper, and the runner that drives them.
//!
//! Workers share no in-process state: every hand-off goes through the
//! manifest's conditional transitions and the task queues.
//! - **Download**: `QUEUED/RETRY -> DOWNLOADING -> DOWNLOADED -> PROCESSING_QUEUED`
//! - **Processing**: `PROCESSING_QUEUED/RETRY -> PROCESSING -> COMPLETE | SKIPPED`
//! - **Reaper**: reclaims stuck in-progress records, requeues orphaned ones

mod download;
mod pool;
mod processing;
mod reaper;
mod runner;
mod stage;
mod types;

pub use download::DownloadStage;
pub use pool::{process_next, WorkerPool};
pub use processing::ProcessingStage;
pub use reaper::Reaper;
pub use runner::PipelineRunner;
pub use stage::{PipelineContext, StageHandler};
pub use types::{PipelineStatus, ReaperReport, StageOutcome, WorkerError};
