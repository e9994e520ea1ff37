use image_resize_pipeline::{
    config::AppConfig,
    services::{
        consumer::{Processed, QueueConsumer},
        queue::RedisJobQueue,
        storage::S3BlobStore,
        worker::{ResizeWorker, WorkerSettings},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting image resize worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Metrics are exposed on the exporter's default listener (0.0.0.0:9000)
    PrometheusBuilder::new()
        .install()
        .expect("Failed to install Prometheus exporter");

    metrics::describe_histogram!(
        "resize_processing_seconds",
        "Time to produce all derivatives for a resize job"
    );
    metrics::describe_counter!("resize_jobs_completed_total", "Total resize jobs completed");
    metrics::describe_counter!("resize_jobs_failed_total", "Total failed resize attempts");
    metrics::describe_counter!(
        "resize_jobs_dead_lettered_total",
        "Total resize jobs moved to the dead-letter queue"
    );
    metrics::describe_counter!("resize_derivatives_total", "Total derivatives stored");
    metrics::describe_gauge!(
        "resize_queue_depth",
        "Current number of resize jobs waiting in the queue"
    );

    tracing::info!("Initializing services");
    let storage = S3BlobStore::new(
        &config.s3_endpoint,
        &config.s3_region,
        &config.s3_access_key,
        &config.s3_secret_key,
        config.public_base_url.as_deref(),
    )
    .expect("Failed to initialize storage client");

    let queue = Arc::new(
        RedisJobQueue::new(&config.redis_url, config.queue_settings())
            .expect("Failed to initialize job queue"),
    );

    let worker = Arc::new(ResizeWorker::new(
        Arc::new(storage),
        queue.clone(),
        WorkerSettings::from(&config),
    ));
    let consumer = Arc::new(QueueConsumer::new(queue, worker));
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    tracing::info!(
        concurrency = config.worker_concurrency,
        queue = %config.queue_name,
        "Worker ready, starting job processing loops"
    );

    let mut loops = tokio::task::JoinSet::new();
    for slot in 0..config.worker_concurrency {
        let consumer = Arc::clone(&consumer);
        loops.spawn(async move { run_loop(slot, &consumer, poll_interval).await });
    }

    while let Some(result) = loops.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "Worker loop terminated unexpectedly");
        }
    }
}

/// Poll the queue forever, sleeping when idle or when the queue is unreachable.
async fn run_loop(slot: usize, consumer: &QueueConsumer, poll_interval: Duration) {
    loop {
        match consumer.process_next().await {
            Ok(Processed::Idle) => {
                tracing::trace!(slot, "No jobs available, sleeping");
                if let Err(e) = consumer.report_depth().await {
                    tracing::debug!(slot, error = %e, "Failed to read queue depth");
                }
                sleep(poll_interval).await;
            }
            Ok(outcome) => {
                tracing::debug!(slot, ?outcome, "Job processed, checking for next job");
            }
            Err(e) => {
                tracing::error!(slot, error = %e, "Queue error, will retry");
                sleep(poll_interval).await;
            }
        }
    }
}
