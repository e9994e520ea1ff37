use std::path::Path;
use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::job::ResizeJobMessage;
use crate::models::upload::UploadResponse;
use crate::services::queue::{JobQueue, QueueError};
use crate::services::storage::{BlobStore, StorageError};

const DEFAULT_EXTENSION: &str = ".jpg";

#[derive(Debug, Clone)]
pub struct IngressSettings {
    pub uploads_container: String,
    pub default_sizes: Vec<u32>,
}

impl Default for IngressSettings {
    fn default() -> Self {
        Self {
            uploads_container: "uploads".to_string(),
            default_sizes: vec![320, 1024],
        }
    }
}

impl From<&AppConfig> for IngressSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            uploads_container: config.uploads_container.clone(),
            default_sizes: config.default_sizes.clone(),
        }
    }
}

/// Persists uploaded originals and enqueues a resize job for each.
pub struct IngressHandler {
    storage: Arc<dyn BlobStore>,
    queue: Arc<dyn JobQueue>,
    settings: IngressSettings,
}

impl IngressHandler {
    pub fn new(storage: Arc<dyn BlobStore>, queue: Arc<dyn JobQueue>, settings: IngressSettings) -> Self {
        Self {
            storage,
            queue,
            settings,
        }
    }

    /// Store `data` as a new original and enqueue its resize job.
    ///
    /// The object write completes before the job is enqueued. If the enqueue
    /// fails the stored original is left in place and the error is returned.
    pub async fn submit(&self, data: Vec<u8>, filename: Option<&str>) -> Result<UploadResponse, IngressError> {
        if data.is_empty() {
            return Err(IngressError::EmptyPayload);
        }

        let key = format!("{}{}", Uuid::new_v4(), extension_for(filename));
        let content_type = mime_guess::from_path(&key).first_or_octet_stream();
        let size = data.len();

        let original = self
            .storage
            .put(&self.settings.uploads_container, &key, data, content_type.essence_str())
            .await?;

        let message = ResizeJobMessage::new(&original, self.settings.default_sizes.clone());
        let body = serde_json::to_string(&message).map_err(QueueError::Serialize)?;
        self.queue.enqueue(&body).await?;

        metrics::counter!("resize_jobs_enqueued_total").increment(1);
        tracing::info!(key = %key, bytes = size, url = %original.url, "Original stored and resize job enqueued");

        Ok(UploadResponse::enqueued(original.url))
    }
}

/// Extension (with leading dot) for the stored original.
///
/// Uploads without a filename get `.jpg`; a filename without an extension
/// gets none.
pub fn extension_for(filename: Option<&str>) -> String {
    match filename {
        None => DEFAULT_EXTENSION.to_string(),
        Some(name) => Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{ext}"))
            .unwrap_or_default(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("No image data")]
    EmptyPayload,

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Queue(#[from] QueueError),

    #[error("Invalid multipart body: {0}")]
    Multipart(#[from] MultipartError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::{MemoryBlobStore, MemoryJobQueue};
    use crate::services::queue::QueueSettings;

    fn handler() -> (IngressHandler, Arc<MemoryBlobStore>, Arc<MemoryJobQueue>) {
        let store = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(MemoryJobQueue::new(QueueSettings::new("image-jobs")));
        let handler = IngressHandler::new(store.clone(), queue.clone(), IngressSettings::default());
        (handler, store, queue)
    }

    #[test]
    fn extension_rules() {
        assert_eq!(extension_for(None), ".jpg");
        assert_eq!(extension_for(Some("photo.PNG")), ".PNG");
        assert_eq!(extension_for(Some("archive.tar.gz")), ".gz");
        assert_eq!(extension_for(Some("noext")), "");
        assert_eq!(extension_for(Some(".hidden")), "");
    }

    #[tokio::test]
    async fn empty_payload_has_no_side_effects() {
        let (handler, store, queue) = handler();

        let err = handler.submit(Vec::new(), Some("a.jpg")).await.unwrap_err();
        assert!(matches!(err, IngressError::EmptyPayload));
        assert_eq!(store.count("uploads").await, 0);
        assert!(queue.pending_bodies().await.is_empty());
    }

    #[tokio::test]
    async fn stores_original_then_enqueues_reference() {
        let (handler, store, queue) = handler();

        let response = handler.submit(vec![1, 2, 3], Some("cat.png")).await.unwrap();
        assert_eq!(response.status, "enqueued");
        assert!(response.original_url.ends_with(".png"));

        let bodies = queue.pending_bodies().await;
        assert_eq!(bodies.len(), 1);
        let message: ResizeJobMessage = serde_json::from_str(&bodies[0]).unwrap();
        assert_eq!(message.blob_url, response.original_url);
        assert_eq!(message.sizes, Some(vec![320, 1024]));

        let key = message.source_key("uploads").unwrap();
        let stored = store.object("uploads", key).await.unwrap();
        assert_eq!(stored.data, vec![1, 2, 3]);
        assert_eq!(stored.content_type, "image/png");
    }

    #[tokio::test]
    async fn storage_failure_enqueues_nothing() {
        let (handler, store, queue) = handler();
        store.fail_writes_to("uploads").await;

        let err = handler.submit(vec![9], None).await.unwrap_err();
        assert!(matches!(err, IngressError::Storage(_)));
        assert!(queue.pending_bodies().await.is_empty());
    }

    #[tokio::test]
    async fn enqueue_failure_surfaces_and_leaves_orphan() {
        let (handler, store, queue) = handler();
        queue.set_fail_enqueue(true);

        let err = handler.submit(vec![9], None).await.unwrap_err();
        assert!(matches!(err, IngressError::Queue(_)));
        assert_eq!(store.count("uploads").await, 1);
    }
}
