//! Test helper utilities: in-memory pipeline wiring and HTTP helpers

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use image_resize_pipeline::{
    app_state::AppState,
    models::job::CompletionRecord,
    routes,
    services::{
        consumer::QueueConsumer,
        ingest::IngressSettings,
        memory::{MemoryBlobStore, MemoryJobQueue},
        queue::QueueSettings,
        storage::BlobStore,
        worker::{ResizeWorker, WorkerSettings},
    },
};
use tower::ServiceExt;

pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Ingress router, worker and consumer sharing in-memory adapters
pub struct Pipeline {
    pub store: Arc<MemoryBlobStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub worker: Arc<ResizeWorker>,
    pub consumer: QueueConsumer,
    pub router: Router,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_settings(WorkerSettings::default())
    }

    pub fn with_settings(settings: WorkerSettings) -> Self {
        let store = Arc::new(MemoryBlobStore::new());
        let queue = Arc::new(MemoryJobQueue::new(QueueSettings {
            retry_base_delay: Duration::ZERO,
            retry_max_delay: Duration::ZERO,
            ..QueueSettings::new("image-jobs")
        }));

        let ingress = IngressSettings {
            uploads_container: settings.uploads_container.clone(),
            default_sizes: settings.default_sizes.clone(),
        };
        let state = AppState::new(store.clone(), queue.clone(), ingress);
        let router = routes::router(state, MAX_UPLOAD_BYTES);

        let worker = Arc::new(ResizeWorker::new(store.clone(), queue.clone(), settings));
        let consumer = QueueConsumer::new(queue.clone(), worker.clone());

        Self {
            store,
            queue,
            worker,
            consumer,
            router,
        }
    }

    /// Send a request through the router and return status and body text
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, String) {
        let response = self.router.clone().oneshot(request).await.expect("router call");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    /// Completion records written to the logs container
    pub async fn completion_records(&self) -> Vec<CompletionRecord> {
        let mut records = Vec::new();
        for blob in self.store.list("function-logs", "").await.expect("list logs") {
            let data = self.store.get(&blob.container, &blob.key).await.expect("get log");
            records.push(serde_json::from_slice(&data).expect("parse completion record"));
        }
        records
    }

    /// Decoded dimensions of the derivative behind `url`
    pub async fn derivative_dimensions(&self, url: &str) -> (u32, u32) {
        let key = url.rsplit_once("/resized/").expect("resized url").1;
        let stored = self.store.object("resized", key).await.expect("derivative exists");
        assert_eq!(stored.content_type, "image/jpeg");
        let img = image::load_from_memory(&stored.data).expect("derivative decodes");
        (img.width(), img.height())
    }
}

pub fn raw_upload(data: Vec<u8>) -> Request<Body> {
    Request::post("/upload")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .body(Body::from(data))
        .expect("build request")
}

const BOUNDARY: &str = "X-RESIZE-TEST-BOUNDARY";

/// Build a multipart/form-data request with one field
pub fn multipart_upload(field: &str, filename: &str, data: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::post("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("build request")
}

/// Enqueue a raw job body directly, bypassing ingress
pub async fn enqueue_raw(pipeline: &Pipeline, body: &str) {
    use image_resize_pipeline::services::queue::JobQueue;
    pipeline.queue.enqueue(body).await.expect("enqueue");
}

/// Store an original in the uploads container and return its URL
pub async fn store_original(pipeline: &Pipeline, key: &str, data: Vec<u8>) -> String {
    pipeline
        .store
        .put("uploads", key, data, "image/jpeg")
        .await
        .expect("store original")
        .url
}
