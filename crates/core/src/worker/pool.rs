//! Fixed-size worker pools, one independent loop per worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{StageHandler, StageOutcome, WorkerError};
use crate::queue::{Delivery, QueueName, TaskQueue};

/// Pop one delivery from the handler's queue, handle it and acknowledge it.
///
/// Returns `Ok(None)` when the queue has nothing ready. A handler error
/// leaves the delivery unacknowledged so it is redelivered after the
/// visibility timeout.
pub async fn process_next(
    handler: &dyn StageHandler,
    queue: &dyn TaskQueue,
) -> Result<Option<StageOutcome>, WorkerError> {
    let queue_name = QueueName::for_stage(handler.stage());
    let delivery = match queue.pop(queue_name)? {
        Some(delivery) => delivery,
        None => return Ok(None),
    };

    if delivery.deliveries > 1 {
        debug!(
            "Redelivery #{} of {} on {} queue",
            delivery.deliveries,
            delivery.item.file_id(),
            queue_name
        );
    }

    let outcome = handler.handle(&delivery).await?;
    acknowledge(queue, &delivery);
    Ok(Some(outcome))
}

fn acknowledge(queue: &dyn TaskQueue, delivery: &Delivery) {
    match queue.ack(delivery) {
        Ok(true) => {}
        // The item was rescheduled while we held it; the newer entry stays.
        Ok(false) => debug!("Delivery for {} superseded", delivery.item.file_id()),
        Err(e) => warn!(
            "Failed to acknowledge delivery for {}: {}",
            delivery.item.file_id(),
            e
        ),
    }
}

/// A pool of identical workers draining one stage's queue.
pub struct WorkerPool {
    handler: Arc<dyn StageHandler>,
    queue: Arc<dyn TaskQueue>,
    workers: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        handler: Arc<dyn StageHandler>,
        queue: Arc<dyn TaskQueue>,
        workers: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            handler,
            queue,
            workers,
            poll_interval,
        }
    }

    /// Spawn the worker loops. Each stops after its current item once
    /// `shutdown` fires.
    pub fn spawn(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|id| {
                let handler = Arc::clone(&self.handler);
                let queue = Arc::clone(&self.queue);
                let poll_interval = self.poll_interval;
                let shutdown_rx = shutdown.subscribe();
                tokio::spawn(worker_loop(id, handler, queue, poll_interval, shutdown_rx))
            })
            .collect()
    }
}

async fn worker_loop(
    id: usize,
    handler: Arc<dyn StageHandler>,
    queue: Arc<dyn TaskQueue>,
    poll_interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let stage = handler.stage();
    info!("{} worker {} started", stage, id);

    loop {
        match shutdown_rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => break,
        }

        let idle = match process_next(handler.as_ref(), queue.as_ref()).await {
            Ok(Some(outcome)) => {
                debug!("{} worker {}: {:?}", stage, id, outcome);
                false
            }
            Ok(None) => true,
            Err(e) => {
                error!("{} worker {}: {}", stage, id, e);
                true
            }
        };

        if idle {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }
    }

    info!("{} worker {} stopped", stage, id);
}
