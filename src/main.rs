use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use image_resize_pipeline::{
    app_state::AppState,
    config::AppConfig,
    routes,
    services::{ingest::IngressSettings, queue::RedisJobQueue, storage::S3BlobStore},
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing image upload server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    metrics::describe_counter!("resize_uploads_total", "Total upload requests received");
    metrics::describe_counter!(
        "resize_jobs_enqueued_total",
        "Total resize jobs enqueued after storing the original"
    );

    tracing::info!("Initializing object storage client");
    let storage = S3BlobStore::new(
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
        config.public_base_url.as_deref(),
    )
    .expect("Failed to initialize storage client");

    tracing::info!(queue = %config.queue_name, "Connecting to Redis job queue");
    let queue = RedisJobQueue::new(&config.redis_url, config.queue_settings())
        .expect("Failed to initialize job queue");

    let state = AppState::new(
        Arc::new(storage),
        Arc::new(queue),
        IngressSettings::from(&config),
    );

    let app = Router::new()
        .merge(routes::router(state, config.max_upload_bytes))
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(config.max_upload_bytes));

    tracing::info!("Starting image upload server on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
