use std::sync::Arc;

use crate::services::{
    ingest::{IngressHandler, IngressSettings},
    queue::JobQueue,
    storage::BlobStore,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn BlobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub ingress: Arc<IngressHandler>,
    /// Container probed by the health check.
    pub uploads_container: String,
}

impl AppState {
    pub fn new(storage: Arc<dyn BlobStore>, queue: Arc<dyn JobQueue>, settings: IngressSettings) -> Self {
        let uploads_container = settings.uploads_container.clone();
        let ingress = IngressHandler::new(Arc::clone(&storage), Arc::clone(&queue), settings);

        Self {
            storage,
            queue,
            ingress: Arc::new(ingress),
            uploads_container,
        }
    }
}
