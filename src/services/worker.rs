use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::blob::BlobReference;
use crate::models::job::{CompletionRecord, Derivative, ResizeJobMessage};
use crate::services::queue::{Delivery, JobQueue};
use crate::services::resize::{self, ResizeError};
use crate::services::storage::BlobStore;

/// Containers, defaults and the dead-letter threshold the worker runs with.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub uploads_container: String,
    pub resized_container: String,
    pub logs_container: String,
    /// Namespace for completion records inside the logs container.
    pub worker_name: String,
    pub default_sizes: Vec<u32>,
    pub dead_letter_threshold: u32,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            uploads_container: "uploads".to_string(),
            resized_container: "resized".to_string(),
            logs_container: "function-logs".to_string(),
            worker_name: "ImageResizer".to_string(),
            default_sizes: vec![320, 1024],
            dead_letter_threshold: 5,
        }
    }
}

impl From<&AppConfig> for WorkerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            uploads_container: config.uploads_container.clone(),
            resized_container: config.resized_container.clone(),
            logs_container: config.logs_container.clone(),
            worker_name: config.worker_name.clone(),
            default_sizes: config.default_sizes.clone(),
            dead_letter_threshold: config.dead_letter_threshold,
        }
    }
}

/// Everything a successful run produced.
#[derive(Debug, Clone)]
pub struct ResizeOutcome {
    pub derivatives: Vec<Derivative>,
    pub record: CompletionRecord,
    pub record_blob: BlobReference,
}

/// Failed execution of one delivery.
///
/// `retryable` tells the hosting layer whether the message should be
/// redelivered. A non-retryable failure has already been dead-lettered.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct JobFailure {
    #[source]
    pub error: ResizeError,
    pub retryable: bool,
}

/// Consumes resize jobs: fetches the original, writes one derivative per
/// target width and a completion record, and applies the dead-letter policy.
pub struct ResizeWorker {
    storage: Arc<dyn BlobStore>,
    queue: Arc<dyn JobQueue>,
    settings: WorkerSettings,
}

impl ResizeWorker {
    pub fn new(storage: Arc<dyn BlobStore>, queue: Arc<dyn JobQueue>, settings: WorkerSettings) -> Self {
        Self {
            storage,
            queue,
            settings,
        }
    }

    /// Process one delivery.
    ///
    /// Failures below the dead-letter threshold are returned as retryable.
    /// At or above it the raw body is forwarded to the dead-letter queue and
    /// the failure is returned as non-retryable.
    pub async fn handle(&self, delivery: &Delivery) -> Result<ResizeOutcome, JobFailure> {
        tracing::info!(
            message_id = %delivery.id,
            delivery_count = delivery.delivery_count,
            "Processing resize job"
        );

        let error = match self.process(&delivery.body).await {
            Ok(outcome) => {
                tracing::info!(
                    message_id = %delivery.id,
                    original_url = %outcome.record.original_url,
                    derivatives = outcome.derivatives.len(),
                    "Resize job succeeded"
                );
                return Ok(outcome);
            }
            Err(e) => e,
        };

        tracing::error!(
            message_id = %delivery.id,
            delivery_count = delivery.delivery_count,
            error = %error,
            "Resize failed"
        );
        metrics::counter!("resize_jobs_failed_total").increment(1);

        if delivery.delivery_count < self.settings.dead_letter_threshold {
            return Err(JobFailure {
                error,
                retryable: true,
            });
        }

        if let Err(e) = self.queue.dead_letter(&delivery.body).await {
            // Redelivery retries the dead-letter send.
            tracing::error!(
                message_id = %delivery.id,
                error = %e,
                "Failed to move message to dead-letter queue"
            );
            return Err(JobFailure {
                error,
                retryable: true,
            });
        }

        metrics::counter!("resize_jobs_dead_lettered_total").increment(1);
        tracing::warn!(
            message_id = %delivery.id,
            delivery_count = delivery.delivery_count,
            "Moved to dead-letter queue after repeated failures"
        );

        Err(JobFailure {
            error,
            retryable: false,
        })
    }

    async fn process(&self, body: &str) -> Result<ResizeOutcome, ResizeError> {
        let message: ResizeJobMessage = serde_json::from_str(body)
            .map_err(|e| ResizeError::InvalidMessage(e.to_string()))?;

        let key = message
            .source_key(&self.settings.uploads_container)
            .ok_or_else(|| {
                ResizeError::InvalidMessage(format!(
                    "blobUrl has no /{}/ segment: {}",
                    self.settings.uploads_container, message.blob_url
                ))
            })?;

        let bytes = self
            .storage
            .get(&self.settings.uploads_container, key)
            .await?;
        let image = Arc::new(tokio::task::spawn_blocking(move || resize::decode(&bytes)).await??);

        let start = Instant::now();
        let widths = message.target_widths(&self.settings.default_sizes);
        let mut derivatives = Vec::with_capacity(widths.len());

        for &width in widths {
            let source = Arc::clone(&image);
            let rendered =
                tokio::task::spawn_blocking(move || resize::render_derivative(&source, width)).await??;

            let key = format!("{}_{}.jpg", Uuid::new_v4(), width);
            let blob = self
                .storage
                .put(&self.settings.resized_container, &key, rendered.jpeg, "image/jpeg")
                .await?;

            tracing::debug!(width = rendered.width, height = rendered.height, url = %blob.url, "Stored derivative");
            metrics::counter!("resize_derivatives_total").increment(1);

            derivatives.push(Derivative {
                width: rendered.width,
                height: rendered.height,
                blob,
            });
        }

        let elapsed = start.elapsed().as_secs_f64();
        let record = CompletionRecord::success(&message.blob_url, &derivatives, elapsed, Utc::now());
        let record_blob = self.write_record(&record).await?;

        metrics::histogram!("resize_processing_seconds").record(elapsed);
        metrics::counter!("resize_jobs_completed_total").increment(1);

        Ok(ResizeOutcome {
            derivatives,
            record,
            record_blob,
        })
    }

    async fn write_record(&self, record: &CompletionRecord) -> Result<BlobReference, ResizeError> {
        let key = format!("{}/{}.json", self.settings.worker_name, Uuid::new_v4());
        let json = serde_json::to_vec_pretty(record)?;

        Ok(self
            .storage
            .put(&self.settings.logs_container, &key, json, "application/json")
            .await?)
    }
}
