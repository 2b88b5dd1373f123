use std::sync::Arc;

use crate::services::{
    job_store::JobStore, notifications::NotificationCenter, tracker::JobTracker,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<JobTracker>,
    pub store: Arc<JobStore>,
    pub notifications: Arc<NotificationCenter>,
}

impl AppState {
    pub fn new(tracker: Arc<JobTracker>, notifications: Arc<NotificationCenter>) -> Self {
        Self {
            store: tracker.store().clone(),
            tracker,
            notifications,
        }
    }
}
