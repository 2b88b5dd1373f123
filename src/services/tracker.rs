use std::sync::Arc;

use crate::models::job::TrackedJob;
use crate::services::clock::Clock;
use crate::services::job_store::{JobStore, StoreError};
use crate::services::poller::JobPoller;
use crate::services::transport::{ImageUpload, InferenceTransport, TransportError};

/// Entry point for submitting images and keeping their jobs polled.
pub struct JobTracker {
    transport: Arc<dyn InferenceTransport>,
    store: Arc<JobStore>,
    poller: Arc<JobPoller>,
    clock: Arc<dyn Clock>,
    local_fallback: bool,
}

impl JobTracker {
    pub fn new(
        transport: Arc<dyn InferenceTransport>,
        store: Arc<JobStore>,
        poller: Arc<JobPoller>,
        clock: Arc<dyn Clock>,
        local_fallback: bool,
    ) -> Self {
        Self {
            transport,
            store,
            poller,
            clock,
            local_fallback,
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Submit an image and start tracking the resulting job.
    ///
    /// If the inference API cannot take the upload and local fallback is
    /// enabled, the job is simulated in-process instead and its id carries
    /// the local prefix.
    pub async fn submit(&self, upload: ImageUpload) -> Result<TrackedJob, SubmitError> {
        let job_id = match self.transport.submit(&upload).await {
            Ok(job_id) => job_id,
            Err(e) if self.local_fallback => {
                tracing::warn!(
                    filename = %upload.filename,
                    error = %e,
                    "Inference API unavailable, falling back to local processing"
                );
                self.transport.submit_local(&upload).await
            }
            Err(e) => return Err(SubmitError::Transport(e)),
        };

        let job = TrackedJob::new(
            job_id,
            upload.filename,
            upload.content_type,
            self.poller.config().max_attempts,
            self.clock.now(),
        );
        let job = self.store.create(job).await?;

        metrics::counter!("triage_jobs_submitted_total", "provenance" => job.provenance.to_string())
            .increment(1);
        tracing::info!(
            job_id = %job.job_id,
            provenance = %job.provenance,
            filename = %job.filename,
            "Job submitted"
        );

        self.poller.schedule(&job.job_id);
        Ok(job)
    }

    /// Resume polling every job that was left unfinished, e.g. by a restart.
    pub async fn resume(&self) -> usize {
        let active = self.store.active_jobs().await;
        let mut resumed = 0;
        for job in &active {
            if self.poller.schedule(&job.job_id) {
                resumed += 1;
            }
        }
        tracing::info!(resumed = resumed, "Resumed polling for unfinished jobs");
        resumed
    }

    pub fn active_polls(&self) -> usize {
        self.poller.active_timers()
    }

    /// Cancel every pending poll.
    pub fn shutdown(&self) {
        self.poller.shutdown();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("inference API rejected the upload: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::{AnalysisResult, JobProvenance, JobState};
    use crate::services::clock::SystemClock;
    use crate::services::poller::PollerConfig;
    use crate::services::simulator::LocalSimulator;
    use crate::services::storage::MemoryKvStore;
    use crate::services::transport::StatusReport;
    use async_trait::async_trait;
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Remote side is always down; local jobs go to a real simulator.
    #[derive(Default)]
    struct OfflineTransport {
        simulator: LocalSimulator,
        remote_calls: AtomicU32,
    }

    #[async_trait]
    impl InferenceTransport for OfflineTransport {
        async fn submit(&self, _upload: &ImageUpload) -> Result<String, TransportError> {
            self.remote_calls.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Status {
                status: StatusCode::BAD_GATEWAY,
                body: "unreachable".to_string(),
            })
        }

        async fn submit_local(&self, upload: &ImageUpload) -> String {
            self.simulator.submit(&upload.filename)
        }

        async fn poll_status(&self, job: &TrackedJob) -> Result<StatusReport, TransportError> {
            assert_eq!(job.provenance, JobProvenance::Local);
            Ok(self.simulator.poll(job.progress_hint))
        }

        async fn fetch_result(&self, job_id: &str) -> Result<Option<AnalysisResult>, TransportError> {
            Ok(Some(self.simulator.result(job_id)))
        }
    }

    fn tracker(transport: Arc<OfflineTransport>, local_fallback: bool) -> JobTracker {
        let store = Arc::new(JobStore::new(Arc::new(MemoryKvStore::new())));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let poller = Arc::new(JobPoller::new(
            transport.clone(),
            store.clone(),
            clock.clone(),
            PollerConfig {
                interval: Duration::from_secs(2),
                max_attempts: 30,
            },
        ));
        JobTracker::new(transport, store, poller, clock, local_fallback)
    }

    fn upload() -> ImageUpload {
        ImageUpload {
            bytes: vec![0x89, b'P', b'N', b'G'],
            filename: "chest_xray.png".to_string(),
            content_type: "image/png".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_submit_falls_back_and_completes() {
        let transport = Arc::new(OfflineTransport::default());
        let tracker = tracker(transport.clone(), true);

        let job = tracker.submit(upload()).await.unwrap();
        assert_eq!(job.provenance, JobProvenance::Local);
        assert_eq!(job.state, JobState::Submitted);
        assert_eq!(tracker.active_polls(), 1);

        for _ in 0..20 {
            tokio::time::sleep(Duration::from_secs(2)).await;
            if tracker.active_polls() == 0 {
                break;
            }
        }

        let job = tracker.store().get(&job.job_id).await.unwrap();
        assert_eq!(job.state, JobState::Completed);
        assert_eq!(job.attempt_count, crate::services::simulator::LOCAL_POLLS_TO_COMPLETE);
        assert_eq!(transport.remote_calls.load(Ordering::SeqCst), 1);
        let case = tracker.store().case(&job.job_id).await.unwrap();
        assert_eq!(case.modality, "X-Ray");
    }

    #[tokio::test]
    async fn test_submit_without_fallback_returns_error() {
        let tracker = tracker(Arc::new(OfflineTransport::default()), false);

        let err = tracker.submit(upload()).await.unwrap_err();
        assert!(matches!(err, SubmitError::Transport(_)));
        assert!(tracker.store().list_all().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_schedules_unfinished_jobs_once() {
        let transport = Arc::new(OfflineTransport::default());
        let tracker = tracker(transport, true);
        let store = tracker.store().clone();

        store
            .create(TrackedJob::new("local-1-aaa", "a.png", "image/png", 30, chrono::Utc::now()))
            .await
            .unwrap();
        store
            .create(TrackedJob::new("local-2-bbb", "b.png", "image/png", 30, chrono::Utc::now()))
            .await
            .unwrap();

        assert_eq!(tracker.resume().await, 2);
        assert_eq!(tracker.resume().await, 0);

        tracker.shutdown();
        assert_eq!(tracker.active_polls(), 0);
    }
}
