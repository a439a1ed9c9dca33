//! Asynchronous stage-metric recording.
//!
//! Workers push [`StageMetric`](crate::manifest::StageMetric)s through a
//! bounded channel; a single writer task appends them to the metric store.
//! A failure to record never fails the stage attempt that produced it.

mod handle;
mod writer;

pub use handle::RecorderHandle;
pub use writer::{create_recorder, RecorderWriter};
