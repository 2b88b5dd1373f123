use axum::extract::State;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Prometheus scrape endpoint. Job counters, store persistence failures and
/// the active poll gauge are rendered in text exposition format.
pub async fn prometheus_metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    handle.render()
}

/// Register descriptions for every metric the tracker records.
pub fn describe() {
    metrics::describe_counter!(
        "triage_jobs_submitted_total",
        "Total analysis jobs submitted, labelled by provenance"
    );
    metrics::describe_counter!(
        "triage_jobs_completed_total",
        "Total analysis jobs that produced a result"
    );
    metrics::describe_counter!(
        "triage_jobs_failed_total",
        "Total analysis jobs that failed"
    );
    metrics::describe_counter!(
        "triage_jobs_timed_out_total",
        "Total analysis jobs that ran out of poll attempts"
    );
    metrics::describe_counter!(
        "triage_store_persist_failures_total",
        "Job store writes that could not be persisted"
    );
    metrics::describe_gauge!(
        "triage_active_polls",
        "Jobs currently scheduled for status polling"
    );
}
