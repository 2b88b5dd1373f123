//! Status polling for tracked jobs.
//!
//! [`JobPoller::tick`] performs exactly one poll of one job and records its
//! outcome as a single store update. [`JobPoller::schedule`] drives `tick` on
//! a per-job tokio task: the next poll is only scheduled once the previous
//! one has been fully processed, so a job never has two requests in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::models::api::RemoteStatus;
use crate::models::job::{JobState, JobUpdate, TrackedJob};
use crate::services::clock::Clock;
use crate::services::job_store::{JobStore, StoreError};
use crate::services::materializer;
use crate::services::transport::InferenceTransport;

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Delay before each poll, including the first.
    pub interval: Duration,
    /// Poll budget given to newly created jobs.
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The job is still running; poll again after the interval.
    Continue,
    /// The job is in a terminal state; stop polling.
    Finished(JobState),
}

/// Progress estimate for polls where the service reported none.
pub fn derived_progress(attempt: u32, max_attempts: u32) -> f64 {
    let fraction = f64::from(attempt) / f64::from(max_attempts.max(1));
    (25.0 + fraction * 75.0).min(95.0)
}

pub struct JobPoller {
    transport: Arc<dyn InferenceTransport>,
    store: Arc<JobStore>,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl JobPoller {
    pub fn new(
        transport: Arc<dyn InferenceTransport>,
        store: Arc<JobStore>,
        clock: Arc<dyn Clock>,
        config: PollerConfig,
    ) -> Self {
        Self {
            transport,
            store,
            clock,
            config,
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> PollerConfig {
        self.config
    }

    /// Poll one job once and record the outcome.
    ///
    /// A job already in a terminal state is left alone and no request is made.
    pub async fn tick(&self, job_id: &str) -> Result<TickOutcome, StoreError> {
        let job = self
            .store
            .get(job_id)
            .await
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;

        if job.is_terminal() {
            return Ok(TickOutcome::Finished(job.state));
        }

        let update = self.observe(&job).await;
        let job = self.store.update(job_id, update).await?;
        self.record_outcome(&job).await;

        if job.is_terminal() {
            Ok(TickOutcome::Finished(job.state))
        } else {
            Ok(TickOutcome::Continue)
        }
    }

    /// Ask the transport about a job and decide what this poll means.
    async fn observe(&self, job: &TrackedJob) -> JobUpdate {
        if job.attempt_count >= job.max_attempts {
            return JobUpdate::TimeOut {
                polled_at: self.clock.now(),
                detail: format!("No result after {} status checks", job.attempt_count),
            };
        }
        let attempt = job.attempt_count + 1;

        let report = match self.transport.poll_status(job).await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(job_id = %job.job_id, attempt, error = %e, "Status check failed");
                return JobUpdate::Fail {
                    polled_at: self.clock.now(),
                    detail: format!("Status check failed: {}", e),
                };
            }
        };

        match report.status {
            RemoteStatus::Completed => match self.transport.fetch_result(&job.job_id).await {
                Ok(Some(result)) => {
                    return JobUpdate::Complete {
                        polled_at: self.clock.now(),
                        result,
                    };
                }
                Ok(None) => {
                    // Marked done before the result became queryable.
                    tracing::debug!(job_id = %job.job_id, attempt, "Result not ready yet");
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.job_id, attempt, error = %e, "Result fetch failed");
                    return JobUpdate::Fail {
                        polled_at: self.clock.now(),
                        detail: format!("Result fetch failed: {}", e),
                    };
                }
            },
            RemoteStatus::Error => {
                return JobUpdate::Fail {
                    polled_at: self.clock.now(),
                    detail: "Inference service reported a processing error".to_string(),
                };
            }
            RemoteStatus::Uploaded
            | RemoteStatus::Processing
            | RemoteStatus::AiComplete
            | RemoteStatus::Unknown => {}
        }

        if attempt >= job.max_attempts {
            return JobUpdate::TimeOut {
                polled_at: self.clock.now(),
                detail: format!("No result after {} status checks", attempt),
            };
        }

        JobUpdate::Progress {
            polled_at: self.clock.now(),
            progress_hint: report
                .progress
                .unwrap_or_else(|| derived_progress(attempt, job.max_attempts)),
        }
    }

    async fn record_outcome(&self, job: &TrackedJob) {
        match job.state {
            JobState::Completed => {
                if let Some(case) = materializer::materialize_job(job) {
                    tracing::info!(
                        job_id = %job.job_id,
                        attempts = job.attempt_count,
                        priority = %case.priority,
                        confidence = case.ai.confidence_top,
                        "Job completed"
                    );
                    self.store.record_case(case).await;
                }
                metrics::counter!("triage_jobs_completed_total").increment(1);
            }
            JobState::Failed => {
                tracing::warn!(
                    job_id = %job.job_id,
                    attempts = job.attempt_count,
                    error = job.error_detail.as_deref().unwrap_or_default(),
                    "Job failed"
                );
                metrics::counter!("triage_jobs_failed_total").increment(1);
            }
            JobState::TimedOut => {
                tracing::warn!(
                    job_id = %job.job_id,
                    attempts = job.attempt_count,
                    "Job timed out"
                );
                metrics::counter!("triage_jobs_timed_out_total").increment(1);
            }
            JobState::Submitted | JobState::Processing => {
                tracing::debug!(
                    job_id = %job.job_id,
                    attempt = job.attempt_count,
                    progress = job.progress_hint,
                    "Job still processing"
                );
            }
        }
    }

    /// Start polling a job on its own timer.
    ///
    /// Returns `false` if the job already has a live timer.
    pub fn schedule(self: &Arc<Self>, job_id: &str) -> bool {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        if timers.get(job_id).is_some_and(|handle| !handle.is_finished()) {
            return false;
        }

        let poller = Arc::clone(self);
        let id = job_id.to_string();
        // Inserted while the lock is held, so the task cannot deregister first.
        let handle = tokio::spawn(async move { poller.run(id).await });
        timers.insert(job_id.to_string(), handle);
        metrics::gauge!("triage_active_polls").set(timers.len() as f64);
        true
    }

    async fn run(self: Arc<Self>, job_id: String) {
        loop {
            tokio::time::sleep(self.config.interval).await;
            match self.tick(&job_id).await {
                Ok(TickOutcome::Continue) => {}
                Ok(TickOutcome::Finished(state)) => {
                    tracing::debug!(job_id = %job_id, state = %state, "Polling finished");
                    break;
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Polling stopped");
                    break;
                }
            }
        }

        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.remove(&job_id);
        metrics::gauge!("triage_active_polls").set(timers.len() as f64);
    }

    /// Number of jobs with a pending or running poll loop.
    pub fn active_timers(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Cancel every pending poll. Jobs keep their current state and can be
    /// resumed from storage later.
    pub fn shutdown(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(|e| e.into_inner());
        let count = timers.len();
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        metrics::gauge!("triage_active_polls").set(0.0);
        tracing::info!(cancelled = count, "Poller shut down");
    }
}
