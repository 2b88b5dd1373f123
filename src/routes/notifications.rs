use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::models::notification::{Notification, Severity};

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub severity: Option<Severity>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NotificationList {
    pub unread: usize,
    pub notifications: Vec<Notification>,
}

/// GET /api/v1/notifications: newest first, optionally filtered by severity.
pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> Json<NotificationList> {
    let notifications = match query.severity {
        Some(severity) => state.notifications.by_severity(severity).await,
        None => state.notifications.list().await,
    };
    Json(NotificationList {
        unread: state.notifications.unread_count().await,
        notifications,
    })
}

/// POST /api/v1/notifications/{id}/read
pub async fn mark_read(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.notifications.mark_read(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// POST /api/v1/notifications/read
pub async fn mark_all_read(State(state): State<AppState>) -> StatusCode {
    state.notifications.mark_all_read().await;
    StatusCode::NO_CONTENT
}
