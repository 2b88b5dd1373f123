use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub active_polls: usize,
    pub checks: HealthChecks,
}

#[derive(Serialize, Deserialize)]
pub struct HealthChecks {
    pub storage: ComponentHealth,
}

#[derive(Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    pub backend: String,
    pub latency_ms: Option<u64>,
}

/// GET /health: storage backend status and the number of jobs being polled.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let start = std::time::Instant::now();

    let storage = match state.store.health_check().await {
        Ok(()) => ComponentHealth {
            status: "ok".to_string(),
            backend: state.store.backend_name().to_string(),
            latency_ms: Some(start.elapsed().as_millis() as u64),
        },
        Err(e) => {
            tracing::warn!(error = %e, "Storage health check failed");
            ComponentHealth {
                status: "error".to_string(),
                backend: state.store.backend_name().to_string(),
                latency_ms: None,
            }
        }
    };

    let healthy = storage.status == "ok";
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = HealthResponse {
        status: if healthy {
            "ok".to_string()
        } else {
            "degraded".to_string()
        },
        version: env!("CARGO_PKG_VERSION").to_string(),
        active_polls: state.tracker.active_polls(),
        checks: HealthChecks { storage },
    };

    (status_code, Json(response))
}
