//! Test helper utilities: a scripted mock of the inference API and wiring
//! for a tracker pointed at it.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use triage_tracker::app_state::AppState;
use triage_tracker::models::job::TrackedJob;
use triage_tracker::routes;
use triage_tracker::services::{
    clock::{Clock, SystemClock},
    job_store::JobStore,
    notifications::{EmitterHandle, NotificationCenter, NotificationEmitter, NotificationSink},
    poller::{JobPoller, PollerConfig},
    storage::{KvStore, MemoryKvStore},
    tracker::JobTracker,
    transport::InferenceClient,
};

use crate::fixtures;

pub const MOCK_API_KEY: &str = "test-key";

/// One scripted answer from `GET /status/{job_id}`.
#[derive(Debug, Clone)]
pub enum StatusStep {
    /// HTTP 202 with an empty body.
    Accepted,
    Processing(f64),
    Completed,
    Error,
    Http(u16),
}

/// One scripted answer from `GET /results/{job_id}`.
#[derive(Debug, Clone)]
pub enum ResultStep {
    NotReady,
    Ready(&'static [&'static str], f64),
    OutOfRange,
    Http(u16),
}

/// Per-job scripts. The last step of each script repeats forever.
#[derive(Debug, Clone)]
pub struct MockScript {
    pub statuses: Vec<StatusStep>,
    pub results: Vec<ResultStep>,
}

impl MockScript {
    /// `processing` polls answered with 202, then `completed` and a result.
    pub fn completes_after(accepted_polls: usize, findings: &'static [&'static str]) -> Self {
        let mut statuses = vec![StatusStep::Accepted; accepted_polls];
        statuses.push(StatusStep::Completed);
        Self {
            statuses,
            results: vec![ResultStep::Ready(findings, 0.91)],
        }
    }
}

#[derive(Default)]
struct CallCounts {
    status: usize,
    results: usize,
}

struct MockState {
    script: MockScript,
    next_id: AtomicU32,
    uploads: AtomicU32,
    status_calls: AtomicU32,
    result_calls: AtomicU32,
    per_job: Mutex<HashMap<String, CallCounts>>,
}

pub struct MockInferenceApi {
    pub base_url: String,
    state: Arc<MockState>,
    server: JoinHandle<()>,
}

impl MockInferenceApi {
    pub async fn start(script: MockScript) -> Self {
        let state = Arc::new(MockState {
            script,
            next_id: AtomicU32::new(1),
            uploads: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            result_calls: AtomicU32::new(0),
            per_job: Mutex::new(HashMap::new()),
        });

        let app = Router::new()
            .route("/upload", post(mock_upload))
            .route("/status/{job_id}", get(mock_status))
            .route("/results/{job_id}", get(mock_results))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock inference API");
        let addr = listener.local_addr().expect("mock address");
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock inference API");
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
            server,
        }
    }

    pub fn upload_calls(&self) -> u32 {
        self.state.uploads.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.state.status_calls.load(Ordering::SeqCst)
    }

    pub fn result_calls(&self) -> u32 {
        self.state.result_calls.load(Ordering::SeqCst)
    }
}

impl Drop for MockInferenceApi {
    fn drop(&mut self) {
        self.server.abort();
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("x-api-key").and_then(|v| v.to_str().ok()) == Some(MOCK_API_KEY)
}

async fn mock_upload(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
    }
    let has_image = body["image"].as_str().is_some_and(|s| !s.is_empty());
    if !has_image || body["filename"].as_str().is_none() {
        return (StatusCode::BAD_REQUEST, Json(json!({"error": "missing image"})));
    }

    state.uploads.fetch_add(1, Ordering::SeqCst);
    let job_id = format!("job-{}", state.next_id.fetch_add(1, Ordering::SeqCst));
    (
        StatusCode::OK,
        Json(json!({"job_id": job_id, "message": "Upload accepted", "status": "uploaded"})),
    )
}

async fn mock_status(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
    }
    state.status_calls.fetch_add(1, Ordering::SeqCst);
    let step = {
        let mut per_job = state.per_job.lock().unwrap();
        let counts = per_job.entry(job_id.clone()).or_default();
        let step = script_step(&state.script.statuses, counts.status);
        counts.status += 1;
        step
    };

    match step {
        StatusStep::Accepted => (StatusCode::ACCEPTED, Json(json!({}))),
        StatusStep::Processing(progress) => (
            StatusCode::OK,
            Json(json!({"job_id": job_id, "status": "processing", "progress": progress})),
        ),
        StatusStep::Completed => (
            StatusCode::OK,
            Json(json!({"job_id": job_id, "status": "completed", "progress": 100})),
        ),
        StatusStep::Error => (
            StatusCode::OK,
            Json(json!({"job_id": job_id, "status": "error", "message": "model crashed"})),
        ),
        StatusStep::Http(code) => (
            StatusCode::from_u16(code).unwrap(),
            Json(json!({"error": "scripted failure"})),
        ),
    }
}

async fn mock_results(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> (StatusCode, Json<Value>) {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "bad key"})));
    }
    state.result_calls.fetch_add(1, Ordering::SeqCst);
    let step = {
        let mut per_job = state.per_job.lock().unwrap();
        let counts = per_job.entry(job_id.clone()).or_default();
        let step = script_step(&state.script.results, counts.results);
        counts.results += 1;
        step
    };

    match step {
        ResultStep::NotReady => (StatusCode::NOT_FOUND, Json(json!({"error": "not ready"}))),
        ResultStep::Ready(findings, confidence) => (
            StatusCode::OK,
            Json(fixtures::results_payload(&job_id, findings, confidence)),
        ),
        ResultStep::OutOfRange => (StatusCode::OK, Json(fixtures::out_of_range_payload(&job_id))),
        ResultStep::Http(code) => (
            StatusCode::from_u16(code).unwrap(),
            Json(json!({"error": "scripted failure"})),
        ),
    }
}

fn script_step<T: Clone>(steps: &[T], index: usize) -> T {
    steps[index.min(steps.len() - 1)].clone()
}

/// A tracker wired to a real `InferenceClient`.
pub struct TestTracker {
    pub tracker: Arc<JobTracker>,
    pub store: Arc<JobStore>,
    pub notifications: Arc<NotificationCenter>,
    emitter: Option<EmitterHandle>,
}

impl TestTracker {
    pub fn new(base_url: &str, interval: Duration, max_attempts: u32, local_fallback: bool) -> Self {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let store = Arc::new(JobStore::new(kv.clone()));
        let transport = Arc::new(
            InferenceClient::new(base_url, MOCK_API_KEY, Duration::from_secs(5))
                .expect("build inference client"),
        );
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let poller = Arc::new(JobPoller::new(
            transport.clone(),
            store.clone(),
            clock.clone(),
            PollerConfig {
                interval,
                max_attempts,
            },
        ));
        let tracker = Arc::new(JobTracker::new(
            transport,
            store.clone(),
            poller,
            clock.clone(),
            local_fallback,
        ));

        let notifications = Arc::new(NotificationCenter::new(kv.namespace("triage:notifications")));
        let sinks: Vec<Arc<dyn NotificationSink>> = vec![notifications.clone()];
        let emitter = NotificationEmitter::new(sinks, clock).spawn(store.subscribe());

        Self {
            tracker,
            store,
            notifications,
            emitter: Some(emitter),
        }
    }

    /// Serve the tracker's HTTP routes on an ephemeral port.
    pub async fn serve(&self) -> String {
        let state = AppState::new(self.tracker.clone(), self.notifications.clone());
        let app = routes::router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind app");
        let addr = listener.local_addr().expect("app address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("app server");
        });
        format!("http://{}", addr)
    }

    /// Wait until the job is terminal or the timeout passes.
    pub async fn wait_for_terminal(&self, job_id: &str, timeout: Duration) -> TrackedJob {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.store.get(job_id).await.expect("job is tracked");
            if job.is_terminal() || tokio::time::Instant::now() >= deadline {
                return job;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }

    /// Wait until the notification inbox holds at least `count` entries.
    pub async fn wait_for_notifications(&self, count: usize, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let have = self.notifications.list().await.len();
            if have >= count || tokio::time::Instant::now() >= deadline {
                return have;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for TestTracker {
    fn drop(&mut self) {
        self.tracker.shutdown();
        if let Some(emitter) = self.emitter.take() {
            emitter.shutdown();
        }
    }
}
