//! At-least-once task queues feeding the worker pools.

mod sqlite_queue;
mod types;

use std::time::Duration;

use thiserror::Error;

pub use sqlite_queue::SqliteTaskQueue;
pub use types::{Delivery, DownloadTask, ProcessingTask, QueueDepth, QueueItem, QueueName};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue database error: {0}")]
    Database(String),

    #[error("Queue payload error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for QueueError {
    fn from(e: rusqlite::Error) -> Self {
        QueueError::Database(e.to_string())
    }
}

/// Durable work queue with claim/acknowledge semantics.
///
/// An item stays in the queue until acknowledged. Claims that are not
/// acknowledged in time are handed out again, so handlers must tolerate
/// seeing the same item more than once.
pub trait TaskQueue: Send + Sync {
    /// Enqueue an item, available after `delay`.
    ///
    /// At most one item per file and queue exists; pushing again reschedules it.
    fn push(&self, item: &QueueItem, delay: Duration) -> Result<(), QueueError>;

    /// Claim the oldest available item, if any.
    fn pop(&self, queue: QueueName) -> Result<Option<Delivery>, QueueError>;

    /// Remove a handled item. Returns `false` if the claim is no longer held.
    fn ack(&self, delivery: &Delivery) -> Result<bool, QueueError>;

    fn depth(&self, queue: QueueName) -> Result<QueueDepth, QueueError>;
}
