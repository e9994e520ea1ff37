use std::time::Duration;

use garde::Validate;
use serde::Deserialize;

use crate::services::queue::QueueSettings;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    #[garde(skip)]
    pub bind_addr: String,

    /// Redis connection string for the job queue
    #[garde(length(min = 1))]
    pub redis_url: String,

    /// S3-compatible storage endpoint URL
    #[garde(length(min = 1))]
    pub s3_endpoint: String,

    #[serde(default = "default_s3_region")]
    #[garde(length(min = 1))]
    pub s3_region: String,

    #[garde(skip)]
    pub s3_access_key: String,

    #[garde(skip)]
    pub s3_secret_key: String,

    /// Base for object URLs handed to clients; defaults to the endpoint.
    #[serde(default)]
    #[garde(skip)]
    pub public_base_url: Option<String>,

    #[serde(default = "default_queue_name")]
    #[garde(length(min = 1))]
    pub queue_name: String,

    /// Dead-letter queue; defaults to `<queue_name>-poison`.
    #[serde(default)]
    #[garde(skip)]
    pub poison_queue_name: Option<String>,

    #[serde(default = "default_uploads_container")]
    #[garde(length(min = 1))]
    pub uploads_container: String,

    #[serde(default = "default_resized_container")]
    #[garde(length(min = 1))]
    pub resized_container: String,

    #[serde(default = "default_logs_container")]
    #[garde(length(min = 1))]
    pub logs_container: String,

    /// Namespace for completion records in the logs container
    #[serde(default = "default_worker_name")]
    #[garde(length(min = 1))]
    pub worker_name: String,

    /// Comma-separated target widths, e.g. "320,1024"
    #[serde(default = "default_sizes")]
    #[garde(inner(range(min = 1)))]
    pub default_sizes: Vec<u32>,

    /// Delivery count at which a failing job is dead-lettered
    #[serde(default = "default_dead_letter_threshold")]
    #[garde(range(min = 1))]
    pub dead_letter_threshold: u32,

    #[serde(default = "default_visibility_timeout_secs")]
    #[garde(range(min = 1))]
    pub visibility_timeout_secs: u64,

    #[serde(default = "default_retry_base_delay_ms")]
    #[garde(skip)]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    #[garde(skip)]
    pub retry_max_delay_ms: u64,

    /// Concurrent consumer loops in the worker process
    #[serde(default = "default_worker_concurrency")]
    #[garde(range(min = 1))]
    pub worker_concurrency: usize,

    #[serde(default = "default_poll_interval_ms")]
    #[garde(skip)]
    pub poll_interval_ms: u64,

    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1))]
    pub max_upload_bytes: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_s3_region() -> String {
    "auto".to_string()
}

fn default_queue_name() -> String {
    "image-jobs".to_string()
}

fn default_uploads_container() -> String {
    "uploads".to_string()
}

fn default_resized_container() -> String {
    "resized".to_string()
}

fn default_logs_container() -> String {
    "function-logs".to_string()
}

fn default_worker_name() -> String {
    "ImageResizer".to_string()
}

fn default_sizes() -> Vec<u32> {
    vec![320, 1024]
}

fn default_dead_letter_threshold() -> u32 {
    5
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_retry_max_delay_ms() -> u64 {
    60_000
}

fn default_worker_concurrency() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config: Self = envy::from_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        let mut settings = QueueSettings::new(self.queue_name.clone());
        if let Some(poison) = &self.poison_queue_name {
            settings.dead_letter_name = poison.clone();
        }
        settings.visibility_timeout = Duration::from_secs(self.visibility_timeout_secs);
        settings.retry_base_delay = Duration::from_millis(self.retry_base_delay_ms);
        settings.retry_max_delay = Duration::from_millis(self.retry_max_delay_ms);
        settings
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
