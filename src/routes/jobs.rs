use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::app_state::AppState;
use crate::models::api::UploadAccepted;
use crate::models::case::{CaseRecord, Priority};
use crate::models::job::TrackedJob;
use crate::services::tracker::SubmitError;
use crate::services::transport::ImageUpload;

const DICOM_CONTENT_TYPE: &str = "application/dicom";

/// POST /api/v1/upload: Submit a medical image for AI analysis.
pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadAccepted>), StatusCode> {
    let mut upload: Option<ImageUpload> = None;

    while let Some(field) = multipart.next_field().await.map_err(|_| StatusCode::BAD_REQUEST)? {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let declared = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(|_| StatusCode::BAD_REQUEST)?;

        let content_type = resolve_content_type(declared.as_deref(), &filename, &data)
            .ok_or(StatusCode::UNSUPPORTED_MEDIA_TYPE)?;

        upload = Some(ImageUpload {
            bytes: data.to_vec(),
            filename,
            content_type,
        });
    }

    let upload = upload.ok_or(StatusCode::BAD_REQUEST)?;

    let job = state.tracker.submit(upload).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to submit image");
        match e {
            SubmitError::Transport(_) => StatusCode::BAD_GATEWAY,
            SubmitError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadAccepted {
            job_id: job.job_id,
            status: job.state,
            provenance: job.provenance,
            message: "Image submitted for analysis".to_string(),
        }),
    ))
}

/// Content type of an uploaded image: the declared one when it is specific,
/// otherwise sniffed from the bytes, with `.dcm` files treated as DICOM.
pub fn resolve_content_type(declared: Option<&str>, filename: &str, data: &[u8]) -> Option<String> {
    if let Some(declared) = declared.map(str::trim) {
        if !declared.is_empty() && declared != "application/octet-stream" {
            return Some(declared.to_string());
        }
    }

    if let Ok(format) = image::guess_format(data) {
        return Some(format.to_mime_type().to_string());
    }

    if filename.to_ascii_lowercase().ends_with(".dcm") {
        return Some(DICOM_CONTENT_TYPE.to_string());
    }

    None
}

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<TrackedJob>> {
    Json(state.store.list_all().await)
}

/// GET /api/v1/jobs/{job_id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<TrackedJob>, StatusCode> {
    state.store.get(&job_id).await.map(Json).ok_or(StatusCode::NOT_FOUND)
}

#[derive(Debug, Deserialize)]
pub struct CaseQuery {
    pub priority: Option<Priority>,
}

/// GET /api/v1/cases: newest first, optionally filtered by priority.
pub async fn list_cases(
    State(state): State<AppState>,
    Query(query): Query<CaseQuery>,
) -> Json<Vec<CaseRecord>> {
    let cases = match query.priority {
        Some(priority) => state.store.cases_by_priority(priority).await,
        None => state.store.cases().await,
    };
    Json(cases)
}

/// GET /api/v1/cases/{case_id}
pub async fn get_case(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> Result<Json<CaseRecord>, StatusCode> {
    state.store.case(&case_id).await.map(Json).ok_or(StatusCode::NOT_FOUND)
}
