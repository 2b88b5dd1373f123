pub mod health;
pub mod jobs;
pub mod metrics;
pub mod notifications;

use axum::routing::{get, post};
use axum::Router;

use crate::app_state::AppState;

/// API and health routes. `/metrics` is mounted separately by the binary
/// since it owns the Prometheus recorder.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/api/v1/upload", post(jobs::upload_image))
        .route("/api/v1/jobs", get(jobs::list_jobs))
        .route("/api/v1/jobs/{job_id}", get(jobs::get_job))
        .route("/api/v1/cases", get(jobs::list_cases))
        .route("/api/v1/cases/{case_id}", get(jobs::get_case))
        .route("/api/v1/notifications", get(notifications::list_notifications))
        .route("/api/v1/notifications/read", post(notifications::mark_all_read))
        .route("/api/v1/notifications/{id}/read", post(notifications::mark_read))
        .with_state(state)
}
