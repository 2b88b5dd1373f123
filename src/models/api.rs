//! Wire types for the remote inference API and for this service's own
//! upload endpoint.

use garde::Validate;
use serde::{Deserialize, Serialize};

use crate::models::job::{AnalysisResult, JobProvenance, JobState};

/// Body of `POST /upload` on the inference API.
#[derive(Debug, Serialize)]
pub struct UploadRequest<'a> {
    /// Base64-encoded image bytes.
    pub image: String,
    pub filename: &'a str,
    pub content_type: &'a str,
}

/// Response from `POST /upload`.
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub job_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

/// Job status as reported by `GET /status/{job_id}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RemoteStatus {
    Uploaded,
    Processing,
    AiComplete,
    Completed,
    Error,
    /// Any status string this client does not know; polled like `processing`.
    #[serde(other)]
    Unknown,
}

/// Response from `GET /status/{job_id}` with HTTP 200.
#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub job_id: Option<String>,
    pub status: RemoteStatus,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Optional body of a `202 Accepted` status response.
#[derive(Debug, Default, Deserialize)]
pub struct AcceptedBody {
    #[serde(default)]
    pub progress: Option<f64>,
}

/// Response from `GET /results/{job_id}` with HTTP 200.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ResultsResponse {
    #[garde(length(min = 1))]
    pub job_id: String,

    #[garde(skip)]
    pub status: String,

    #[garde(inner(length(min = 1, max = 500)))]
    pub findings: Vec<String>,

    #[garde(range(min = 0.0, max = 1.0))]
    pub confidence: f64,

    #[serde(default)]
    #[garde(skip)]
    pub summary: Option<String>,

    #[garde(length(min = 1, max = 200))]
    pub model_version: String,
}

impl From<ResultsResponse> for AnalysisResult {
    fn from(resp: ResultsResponse) -> Self {
        AnalysisResult {
            model_version: resp.model_version,
            confidence: resp.confidence,
            findings: resp.findings,
            summary: resp.summary.filter(|s| !s.trim().is_empty()),
        }
    }
}

/// Response after accepting an upload on `POST /api/v1/upload`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadAccepted {
    pub job_id: String,
    pub status: JobState,
    pub provenance: JobProvenance,
    pub message: String,
}
