pub mod health;
pub mod metrics;
pub mod upload;

use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, Router};

use crate::app_state::AppState;

/// API routes (without the metrics endpoint, which needs its own state).
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/upload", post(upload::upload))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}
