//! Tracked-job records, kept in memory and written through to a [`KvStore`].
//!
//! The in-memory map is authoritative for the running process. A failed
//! write to the backing store is logged and counted but never fails the
//! caller, so polling carries on even when persistence is down.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::models::case::{CaseRecord, Priority};
use crate::models::job::{JobState, JobUpdate, TrackedJob, TransitionError};
use crate::services::materializer;
use crate::services::storage::{KvError, KvStore};

const EVENT_CAPACITY: usize = 256;

/// A job moved into a new state. `from` is `None` for a newly created job.
#[derive(Debug, Clone)]
pub struct JobTransition {
    pub job_id: String,
    pub from: Option<JobState>,
    pub to: JobState,
    /// Snapshot of the job right after the transition.
    pub job: TrackedJob,
}

pub struct JobStore {
    kv: Arc<dyn KvStore>,
    jobs: RwLock<HashMap<String, TrackedJob>>,
    cases: RwLock<HashMap<String, CaseRecord>>,
    events: broadcast::Sender<JobTransition>,
}

impl JobStore {
    /// An empty store over `kv`. Existing records in `kv` are ignored; use
    /// [`JobStore::load`] to pick them up.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_records(kv, HashMap::new(), HashMap::new())
    }

    fn with_records(
        kv: Arc<dyn KvStore>,
        jobs: HashMap<String, TrackedJob>,
        cases: HashMap<String, CaseRecord>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            kv,
            jobs: RwLock::new(jobs),
            cases: RwLock::new(cases),
            events,
        }
    }

    /// Reload every persisted job and rebuild cases for completed ones.
    ///
    /// Records that cannot be decoded or that break job invariants are
    /// skipped. If the backend cannot be read at all the store starts empty.
    pub async fn load(kv: Arc<dyn KvStore>) -> Self {
        let mut jobs = HashMap::new();
        let mut cases = HashMap::new();

        match kv.list_all().await {
            Ok(entries) => {
                for (key, value) in entries {
                    let job: TrackedJob = match serde_json::from_str(&value) {
                        Ok(job) => job,
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "Skipping undecodable job record");
                            continue;
                        }
                    };
                    if job.job_id != key || !job.is_consistent() {
                        tracing::warn!(key = %key, state = %job.state, "Skipping inconsistent job record");
                        continue;
                    }
                    if let Some(case) = materializer::materialize_job(&job) {
                        cases.insert(case.case_id.clone(), case);
                    }
                    jobs.insert(key, job);
                }
            }
            Err(e) => {
                tracing::warn!(
                    backend = kv.backend_name(),
                    error = %e,
                    "Failed to read persisted jobs, starting with an empty store"
                );
                metrics::counter!("triage_store_persist_failures_total").increment(1);
            }
        }

        let active = jobs.values().filter(|j| !j.is_terminal()).count();
        tracing::info!(
            backend = kv.backend_name(),
            jobs = jobs.len(),
            active = active,
            "Loaded tracked jobs"
        );

        Self::with_records(kv, jobs, cases)
    }

    /// Insert a newly submitted job and persist it.
    pub async fn create(&self, job: TrackedJob) -> Result<TrackedJob, StoreError> {
        {
            let mut jobs = self.jobs.write().await;
            if jobs.contains_key(&job.job_id) {
                return Err(StoreError::Duplicate(job.job_id.clone()));
            }
            jobs.insert(job.job_id.clone(), job.clone());
        }

        self.persist(&job).await;
        self.publish(None, &job);
        Ok(job)
    }

    pub async fn get(&self, job_id: &str) -> Option<TrackedJob> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Apply one update to a job and persist the result.
    ///
    /// Updates to a job in a terminal state are rejected with
    /// [`TransitionError::Terminal`] and change nothing.
    pub async fn update(&self, job_id: &str, update: JobUpdate) -> Result<TrackedJob, StoreError> {
        let (previous, job) = {
            let mut jobs = self.jobs.write().await;
            let job = jobs
                .get_mut(job_id)
                .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
            let previous = job.apply(update)?;
            (previous, job.clone())
        };

        self.persist(&job).await;
        if previous != job.state {
            self.publish(Some(previous), &job);
        }
        Ok(job)
    }

    /// Every job, most recently created first.
    pub async fn list_all(&self) -> Vec<TrackedJob> {
        let mut jobs: Vec<TrackedJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.job_id.cmp(&a.job_id))
        });
        jobs
    }

    /// Jobs that still need polling, oldest first.
    pub async fn active_jobs(&self) -> Vec<TrackedJob> {
        let mut jobs: Vec<TrackedJob> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| !j.is_terminal())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        jobs
    }

    /// Store (or replace) the case derived from a completed job.
    pub async fn record_case(&self, case: CaseRecord) {
        self.cases.write().await.insert(case.case_id.clone(), case);
    }

    pub async fn case(&self, case_id: &str) -> Option<CaseRecord> {
        self.cases.read().await.get(case_id).cloned()
    }

    /// All cases, newest study first.
    pub async fn cases(&self) -> Vec<CaseRecord> {
        let mut cases: Vec<CaseRecord> = self.cases.read().await.values().cloned().collect();
        cases.sort_by(|a, b| {
            b.study_date_time
                .cmp(&a.study_date_time)
                .then_with(|| b.case_id.cmp(&a.case_id))
        });
        cases
    }

    /// Cases in one priority tier, newest study first.
    pub async fn cases_by_priority(&self, priority: Priority) -> Vec<CaseRecord> {
        self.cases()
            .await
            .into_iter()
            .filter(|case| case.priority == priority)
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobTransition> {
        self.events.subscribe()
    }

    pub async fn health_check(&self) -> Result<(), KvError> {
        self.kv.health_check().await
    }

    pub fn backend_name(&self) -> &'static str {
        self.kv.backend_name()
    }

    async fn persist(&self, job: &TrackedJob) {
        let result = match serde_json::to_string(job) {
            Ok(value) => self.kv.set(&job.job_id, value).await,
            Err(e) => Err(KvError::Serialize(e)),
        };

        if let Err(e) = result {
            tracing::warn!(
                job_id = %job.job_id,
                backend = self.kv.backend_name(),
                error = %e,
                "Failed to persist job record"
            );
            metrics::counter!("triage_store_persist_failures_total").increment(1);
        }
    }

    fn publish(&self, from: Option<JobState>, job: &TrackedJob) {
        // A send error only means nobody is subscribed.
        let _ = self.events.send(JobTransition {
            job_id: job.job_id.clone(),
            from,
            to: job.state,
            job: job.clone(),
        });
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(String),

    #[error("job {0} already exists")]
    Duplicate(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}
