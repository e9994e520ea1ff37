use std::sync::Arc;

use crate::services::queue::{JobQueue, QueueError};
use crate::services::worker::ResizeWorker;

/// Result of one poll of the job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// No message was available.
    Idle,
    Completed,
    /// The job failed and was released for redelivery.
    Retrying,
    DeadLettered,
}

/// Queue integration for the resize worker: dequeues, runs the worker and
/// settles the lease according to the outcome.
pub struct QueueConsumer {
    queue: Arc<dyn JobQueue>,
    worker: Arc<ResizeWorker>,
}

impl QueueConsumer {
    pub fn new(queue: Arc<dyn JobQueue>, worker: Arc<ResizeWorker>) -> Self {
        Self { queue, worker }
    }

    /// Process the next message from the queue.
    /// Returns `Processed::Idle` if no message was available.
    pub async fn process_next(&self) -> Result<Processed, QueueError> {
        let Some(delivery) = self.queue.dequeue().await? else {
            return Ok(Processed::Idle);
        };

        match self.worker.handle(&delivery).await {
            Ok(outcome) => {
                self.queue.ack(&delivery).await?;
                tracing::debug!(
                    message_id = %delivery.id,
                    record_url = %outcome.record_blob.url,
                    "Job acknowledged"
                );
                Ok(Processed::Completed)
            }
            Err(failure) if failure.retryable => {
                self.queue.retry_later(&delivery).await?;
                tracing::info!(
                    message_id = %delivery.id,
                    delivery_count = delivery.delivery_count,
                    "Job released for retry"
                );
                Ok(Processed::Retrying)
            }
            Err(_) => {
                // Already forwarded to the dead-letter queue
                self.queue.ack(&delivery).await?;
                Ok(Processed::DeadLettered)
            }
        }
    }

    /// Publish the current queue depth as a gauge.
    pub async fn report_depth(&self) -> Result<u64, QueueError> {
        let depth = self.queue.depth().await?;
        metrics::gauge!("resize_queue_depth").set(depth as f64);
        Ok(depth)
    }
}
