//! User-facing alerts raised from job state transitions.
//!
//! [`NotificationEmitter`] listens to the job store's transition channel and
//! fans alerts out to every [`NotificationSink`]. Delivery is fire-and-forget:
//! a sink that fails is logged and skipped, and job state is never touched.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use crate::models::job::JobState;
use crate::models::notification::{Notification, NotificationKind, Severity};
use crate::services::clock::Clock;
use crate::services::job_store::JobTransition;
use crate::services::materializer;
use crate::services::storage::KvStore;

/// Inbox size used unless configured otherwise.
pub const DEFAULT_RETENTION: usize = 500;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError>;

    fn name(&self) -> &'static str;
}

/// Writes alerts to the structured log.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        tracing::info!(
            notification_id = %notification.id,
            severity = %notification.severity,
            kind = %notification.kind,
            case_id = %notification.case_id,
            "{}",
            notification.message
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Inbox backing the notifications API.
///
/// Every notification is written through to its own key in a [`KvStore`]
/// namespace, so unread alerts and read state survive a restart. Only the
/// newest `retention` notifications are kept.
pub struct NotificationCenter {
    kv: Arc<dyn KvStore>,
    retention: usize,
    notifications: RwLock<Vec<Notification>>,
}

impl NotificationCenter {
    /// An empty inbox over `kv`. Use [`NotificationCenter::load`] to pick up
    /// notifications already stored there.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self::with_records(kv, DEFAULT_RETENTION, Vec::new())
    }

    fn with_records(kv: Arc<dyn KvStore>, retention: usize, notifications: Vec<Notification>) -> Self {
        Self {
            kv,
            retention: retention.max(1),
            notifications: RwLock::new(notifications),
        }
    }

    /// Reload stored notifications, newest first, dropping any beyond
    /// `retention`. Undecodable records are skipped.
    pub async fn load(kv: Arc<dyn KvStore>, retention: usize) -> Self {
        let mut notifications = Vec::new();
        match kv.list_all().await {
            Ok(entries) => {
                for (key, value) in entries {
                    match serde_json::from_str::<Notification>(&value) {
                        Ok(n) if n.id == key => notifications.push(n),
                        Ok(_) => tracing::warn!(key = %key, "Skipping mismatched notification record"),
                        Err(e) => {
                            tracing::warn!(key = %key, error = %e, "Skipping undecodable notification record")
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    backend = kv.backend_name(),
                    error = %e,
                    "Failed to read stored notifications, starting with an empty inbox"
                );
                metrics::counter!("triage_store_persist_failures_total").increment(1);
            }
        }

        sort_newest_first(&mut notifications);
        let center = Self::with_records(kv, retention, Vec::new());
        let expired = center.retain(&mut notifications);
        *center.notifications.write().await = notifications;
        center.forget(&expired).await;

        tracing::info!(
            backend = center.kv.backend_name(),
            unread = center.unread_count().await,
            "Loaded notifications"
        );
        center
    }

    /// All notifications, newest first.
    pub async fn list(&self) -> Vec<Notification> {
        self.notifications.read().await.clone()
    }

    pub async fn by_severity(&self, severity: Severity) -> Vec<Notification> {
        self.notifications
            .read()
            .await
            .iter()
            .filter(|n| n.severity == severity)
            .cloned()
            .collect()
    }

    pub async fn unread_count(&self) -> usize {
        self.notifications.read().await.iter().filter(|n| !n.read).count()
    }

    /// Returns `false` if no notification has this id.
    pub async fn mark_read(&self, id: &str) -> bool {
        let updated = {
            let mut all = self.notifications.write().await;
            match all.iter_mut().find(|n| n.id == id) {
                Some(n) if n.read => return true,
                Some(n) => {
                    n.read = true;
                    n.clone()
                }
                None => return false,
            }
        };
        self.persist(&updated).await;
        true
    }

    pub async fn mark_all_read(&self) {
        let updated: Vec<Notification> = {
            let mut all = self.notifications.write().await;
            all.iter_mut()
                .filter(|n| !n.read)
                .map(|n| {
                    n.read = true;
                    n.clone()
                })
                .collect()
        };
        for n in &updated {
            self.persist(n).await;
        }
    }

    /// Split off everything past the retention limit.
    fn retain(&self, notifications: &mut Vec<Notification>) -> Vec<Notification> {
        if notifications.len() > self.retention {
            notifications.split_off(self.retention)
        } else {
            Vec::new()
        }
    }

    async fn persist(&self, notification: &Notification) {
        let result = match serde_json::to_string(notification) {
            Ok(value) => self.kv.set(&notification.id, value).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(
                notification_id = %notification.id,
                backend = self.kv.backend_name(),
                error = %e,
                "Failed to persist notification"
            );
            metrics::counter!("triage_store_persist_failures_total").increment(1);
        }
    }

    async fn forget(&self, expired: &[Notification]) {
        for n in expired {
            if let Err(e) = self.kv.delete(&n.id).await {
                tracing::warn!(notification_id = %n.id, error = %e, "Failed to drop expired notification");
            }
        }
    }
}

fn sort_newest_first(notifications: &mut [Notification]) {
    notifications.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
}

#[async_trait]
impl NotificationSink for NotificationCenter {
    async fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        let expired = {
            let mut all = self.notifications.write().await;
            all.push(notification.clone());
            sort_newest_first(&mut all);
            self.retain(&mut all)
        };
        self.persist(notification).await;
        self.forget(&expired).await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "center"
    }
}

/// Build the alert for a transition, if it warrants one.
pub fn notification_for(transition: &JobTransition, clock: &dyn Clock) -> Option<Notification> {
    if transition.from == Some(transition.to) {
        return None;
    }
    let job = &transition.job;

    match transition.to {
        JobState::Completed => {
            let case = materializer::materialize_job(job)?;
            Some(Notification::new(
                Severity::from(case.priority),
                NotificationKind::AiAlert,
                &case.case_id,
                format!(
                    "AI analysis complete for {} - {}. Confidence: {}",
                    case.modality,
                    case.body_part,
                    case.confidence_display()
                ),
                clock.now(),
            ))
        }
        JobState::Failed | JobState::TimedOut => {
            let detail = job.error_detail.as_deref().unwrap_or("no detail");
            Some(Notification::new(
                Severity::Urgent,
                NotificationKind::PipelineIssue,
                &job.job_id,
                format!(
                    "Processing error for case {}. Manual review required. ({})",
                    job.job_id, detail
                ),
                clock.now(),
            ))
        }
        JobState::Submitted | JobState::Processing => None,
    }
}

pub struct NotificationEmitter {
    sinks: Vec<Arc<dyn NotificationSink>>,
    clock: Arc<dyn Clock>,
}

impl NotificationEmitter {
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>, clock: Arc<dyn Clock>) -> Self {
        Self { sinks, clock }
    }

    /// Raise and deliver the alert for one transition.
    pub async fn handle(&self, transition: &JobTransition) -> Option<Notification> {
        let notification = notification_for(transition, self.clock.as_ref())?;

        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&notification).await {
                tracing::warn!(
                    sink = sink.name(),
                    job_id = %transition.job_id,
                    error = %e,
                    "Notification delivery failed"
                );
            }
        }
        Some(notification)
    }

    /// Run the emitter on a background task until the channel closes or
    /// the returned handle is shut down.
    pub fn spawn(self, receiver: broadcast::Receiver<JobTransition>) -> EmitterHandle {
        EmitterHandle {
            task: tokio::spawn(self.run(receiver)),
        }
    }

    async fn run(self, mut receiver: broadcast::Receiver<JobTransition>) {
        loop {
            match receiver.recv().await {
                Ok(transition) => {
                    self.handle(&transition).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Notification emitter lagged, some alerts were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Job store closed, notification emitter shutting down");
                    break;
                }
            }
        }
    }
}

pub struct EmitterHandle {
    task: JoinHandle<()>,
}

impl EmitterHandle {
    pub fn shutdown(self) {
        self.task.abort();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("notification delivery via {sink} was refused: {reason}")]
    Refused { sink: &'static str, reason: String },
}
