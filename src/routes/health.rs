use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub queue: ComponentHealth,
    pub storage: ComponentHealth,
}

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: String,
    pub latency_ms: Option<u64>,
}

impl ComponentHealth {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>, start: std::time::Instant, component: &str) -> Self {
        match result {
            Ok(()) => Self {
                status: "ok".to_string(),
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Err(e) => {
                tracing::warn!(component, error = %e, "Health check failed");
                Self {
                    status: "error".to_string(),
                    latency_ms: None,
                }
            }
        }
    }

    fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// GET /health — health check with queue and storage status.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let queue_start = std::time::Instant::now();
    let queue_check = ComponentHealth::from_result(state.queue.health_check().await, queue_start, "queue");

    let storage_start = std::time::Instant::now();
    let storage_check = ComponentHealth::from_result(
        state.storage.health_check(&state.uploads_container).await,
        storage_start,
        "storage",
    );

    let all_healthy = queue_check.is_ok() && storage_check.is_ok();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if all_healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            queue: queue_check,
            storage: storage_check,
        },
    };

    (status_code, Json(response))
}
