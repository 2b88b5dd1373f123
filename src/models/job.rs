use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Prefix marking job ids that were synthesized by the local fallback path.
pub const LOCAL_JOB_PREFIX: &str = "local-";

/// Lifecycle state of a tracked inference job.
///
/// `Submitted` and `Processing` are polled identically; the remaining three
/// are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Submitted,
    Processing,
    Completed,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed | JobState::TimedOut)
    }
}

/// Where a job is actually being processed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobProvenance {
    /// Accepted by the remote inference service.
    Remote,
    /// Simulated in-process because the remote service was unreachable.
    Local,
}

impl JobProvenance {
    pub fn of(job_id: &str) -> Self {
        if job_id.starts_with(LOCAL_JOB_PREFIX) {
            JobProvenance::Local
        } else {
            JobProvenance::Remote
        }
    }
}

/// Findings returned by the inference service for a completed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    pub model_version: String,
    /// Top-finding confidence in `[0, 1]`, stored unrounded.
    pub confidence: f64,
    pub findings: Vec<String>,
    pub summary: Option<String>,
}

/// One in-flight or finished unit of asynchronous inference work.
///
/// Fields are public for serialization and display, but state changes must
/// go through [`TrackedJob::apply`], which owns the lifecycle invariants:
/// `result` is set iff the job is `Completed`, `error_detail` is set iff it is
/// `Failed` or `TimedOut`, `attempt_count` never decreases or exceeds
/// `max_attempts`, and terminal states are final.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackedJob {
    pub job_id: String,
    pub provenance: JobProvenance,
    pub filename: String,
    pub content_type: String,
    pub state: JobState,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub progress_hint: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub result: Option<AnalysisResult>,
    pub error_detail: Option<String>,
}

/// A single poll's effect on a job. Every variant counts as one poll attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Progress {
        polled_at: DateTime<Utc>,
        progress_hint: f64,
    },
    Complete {
        polled_at: DateTime<Utc>,
        result: AnalysisResult,
    },
    Fail {
        polled_at: DateTime<Utc>,
        detail: String,
    },
    TimeOut {
        polled_at: DateTime<Utc>,
        detail: String,
    },
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransitionError {
    #[error("job {job_id} is already {state} and cannot transition")]
    Terminal { job_id: String, state: JobState },

    #[error("job {job_id} has used all {max_attempts} poll attempts")]
    AttemptsExhausted { job_id: String, max_attempts: u32 },
}

impl TrackedJob {
    /// A freshly submitted job with no polls recorded.
    pub fn new(
        job_id: impl Into<String>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
        max_attempts: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        let job_id = job_id.into();
        Self {
            provenance: JobProvenance::of(&job_id),
            job_id,
            filename: filename.into(),
            content_type: content_type.into(),
            state: JobState::Submitted,
            attempt_count: 0,
            max_attempts,
            progress_hint: None,
            created_at,
            last_polled_at: None,
            result: None,
            error_detail: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Apply one poll outcome. Returns the state the job was in beforehand.
    ///
    /// Rejected updates leave the job untouched.
    pub fn apply(&mut self, update: JobUpdate) -> Result<JobState, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal {
                job_id: self.job_id.clone(),
                state: self.state,
            });
        }
        // A spent budget still admits the timeout that closes the job.
        let exhausted = self.attempt_count >= self.max_attempts;
        if exhausted && !matches!(update, JobUpdate::TimeOut { .. }) {
            return Err(TransitionError::AttemptsExhausted {
                job_id: self.job_id.clone(),
                max_attempts: self.max_attempts,
            });
        }

        let previous = self.state;
        if !exhausted {
            self.attempt_count += 1;
        }

        match update {
            JobUpdate::Progress {
                polled_at,
                progress_hint,
            } => {
                self.state = JobState::Processing;
                self.last_polled_at = Some(polled_at);
                self.progress_hint = Some(progress_hint.clamp(0.0, 100.0));
            }
            JobUpdate::Complete { polled_at, result } => {
                self.state = JobState::Completed;
                self.last_polled_at = Some(polled_at);
                self.progress_hint = Some(100.0);
                self.result = Some(result);
                self.error_detail = None;
            }
            JobUpdate::Fail { polled_at, detail } => {
                self.state = JobState::Failed;
                self.last_polled_at = Some(polled_at);
                self.error_detail = Some(detail);
            }
            JobUpdate::TimeOut { polled_at, detail } => {
                self.state = JobState::TimedOut;
                self.last_polled_at = Some(polled_at);
                self.error_detail = Some(detail);
            }
        }

        Ok(previous)
    }

    /// Check the lifecycle invariants on a record that did not come through
    /// [`TrackedJob::apply`], e.g. one read back from persistent storage.
    pub fn is_consistent(&self) -> bool {
        let result_ok = self.result.is_some() == (self.state == JobState::Completed);
        let error_ok = self.error_detail.is_some()
            == matches!(self.state, JobState::Failed | JobState::TimedOut);
        let attempts_ok = self.attempt_count <= self.max_attempts;
        let provenance_ok = self.provenance == JobProvenance::of(&self.job_id);
        result_ok && error_ok && attempts_ok && provenance_ok
    }
}
