use async_trait::async_trait;
use base64::Engine;
use garde::Validate;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::models::api::{
    AcceptedBody, RemoteStatus, ResultsResponse, StatusResponse, UploadRequest, UploadResponse,
};
use crate::models::job::{AnalysisResult, JobProvenance, TrackedJob};
use crate::services::simulator::LocalSimulator;

const API_KEY_HEADER: &str = "x-api-key";

/// An image handed to the tracker for analysis.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}

/// Status of one job as seen by a single poll.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusReport {
    pub status: RemoteStatus,
    /// Advisory progress in `[0, 100]`, when the service reports one.
    pub progress: Option<f64>,
}

/// Calls against the inference service. No retries happen at this layer.
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    /// Submit an image and return the job id assigned by the service.
    async fn submit(&self, upload: &ImageUpload) -> Result<String, TransportError>;

    /// Start a locally simulated job. Never touches the network.
    async fn submit_local(&self, upload: &ImageUpload) -> String;

    /// Poll a tracked job. Local jobs advance from their recorded progress.
    async fn poll_status(&self, job: &TrackedJob) -> Result<StatusReport, TransportError>;

    /// Fetch the analysis result. `Ok(None)` means "not ready yet".
    async fn fetch_result(&self, job_id: &str) -> Result<Option<AnalysisResult>, TransportError>;
}

/// HTTP client for the remote inference API, with in-process simulation for
/// jobs created by the local fallback.
pub struct InferenceClient {
    http: Client,
    base_url: String,
    api_key: String,
    simulator: LocalSimulator,
}

impl InferenceClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("triage-tracker/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(TransportError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            simulator: LocalSimulator::new(),
        })
    }

    /// Turn a non-2xx response into a `TransportError::Status`.
    async fn reject(response: reqwest::Response) -> TransportError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        TransportError::Status { status, body }
    }
}

#[async_trait]
impl InferenceTransport for InferenceClient {
    async fn submit(&self, upload: &ImageUpload) -> Result<String, TransportError> {
        let url = format!("{}/upload", self.base_url);
        let body = UploadRequest {
            image: base64::engine::general_purpose::STANDARD.encode(&upload.bytes),
            filename: &upload.filename,
            content_type: &upload.content_type,
        };

        let response = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(TransportError::Http)?;

        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        let accepted: UploadResponse = response.json().await.map_err(TransportError::Http)?;
        if accepted.job_id.trim().is_empty() {
            return Err(TransportError::Payload(PayloadError::MissingJobId));
        }

        tracing::debug!(
            job_id = %accepted.job_id,
            status = %accepted.status,
            message = %accepted.message,
            "Upload accepted by inference API"
        );
        Ok(accepted.job_id)
    }

    async fn submit_local(&self, upload: &ImageUpload) -> String {
        self.simulator.submit(&upload.filename)
    }

    async fn poll_status(&self, job: &TrackedJob) -> Result<StatusReport, TransportError> {
        if job.provenance == JobProvenance::Local {
            return Ok(self.simulator.poll(job.progress_hint));
        }

        let url = format!("{}/status/{}", self.base_url, job.job_id);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(TransportError::Http)?;

        // 202 means "still working" whatever the body says.
        if response.status() == StatusCode::ACCEPTED {
            let body = response.bytes().await.unwrap_or_default();
            let accepted: AcceptedBody = serde_json::from_slice(&body).unwrap_or_default();
            return Ok(StatusReport {
                status: RemoteStatus::Processing,
                progress: accepted.progress,
            });
        }

        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        let bytes = response.bytes().await.map_err(TransportError::Http)?;
        let status: StatusResponse = serde_json::from_slice(&bytes).map_err(TransportError::Decode)?;

        Ok(StatusReport {
            status: status.status,
            progress: status.progress,
        })
    }

    async fn fetch_result(&self, job_id: &str) -> Result<Option<AnalysisResult>, TransportError> {
        if JobProvenance::of(job_id) == JobProvenance::Local {
            return Ok(Some(self.simulator.result(job_id)));
        }

        let url = format!("{}/results/{}", self.base_url, job_id);
        let response = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(TransportError::Http)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        let bytes = response.bytes().await.map_err(TransportError::Http)?;
        let payload: ResultsResponse =
            serde_json::from_slice(&bytes).map_err(TransportError::Decode)?;

        validate_results(job_id, payload).map(Some)
    }
}

/// Check a results payload against the schema and the job it was fetched for.
pub fn validate_results(
    job_id: &str,
    payload: ResultsResponse,
) -> Result<AnalysisResult, TransportError> {
    payload.validate().map_err(PayloadError::Invalid)?;

    if payload.status != "completed" {
        return Err(PayloadError::UnexpectedStatus(payload.status).into());
    }
    if payload.job_id != job_id {
        return Err(PayloadError::JobMismatch {
            expected: job_id.to_string(),
            actual: payload.job_id,
        }
        .into());
    }

    Ok(payload.into())
}

/// A response body that parsed but breaks the API contract.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("result payload failed validation: {0}")]
    Invalid(garde::Report),

    #[error("result payload has status {0:?}, expected \"completed\"")]
    UnexpectedStatus(String),

    #[error("result payload is for job {actual}, expected {expected}")]
    JobMismatch { expected: String, actual: String },

    #[error("upload response did not include a job id")]
    MissingJobId,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("inference API returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("failed to decode inference API response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}
