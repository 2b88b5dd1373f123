use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use triage_tracker::app_state::AppState;
use triage_tracker::config::{AppConfig, StoreBackend};
use triage_tracker::routes;
use triage_tracker::services::{
    clock::{Clock, SystemClock},
    job_store::JobStore,
    notifications::{LogSink, NotificationCenter, NotificationEmitter, NotificationSink},
    poller::{JobPoller, PollerConfig},
    storage::{FileKvStore, KvError, KvStore, MemoryKvStore, RedisKvStore},
    tracker::JobTracker,
    transport::InferenceClient,
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing triage-tracker server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);
    routes::metrics::describe();

    // Open the job store and restore any previously tracked jobs
    tracing::info!(backend = ?config.store_backend, "Opening job store");
    let kv = open_kv(&config).await.expect("Failed to open job store");
    let store = Arc::new(JobStore::load(kv.clone()).await);

    // Initialize inference API client
    tracing::info!(base_url = %config.inference_api_base, "Initializing inference API client");
    let transport = Arc::new(
        InferenceClient::new(
            &config.inference_api_base,
            &config.inference_api_key,
            config.request_timeout(),
        )
        .expect("Failed to initialize inference API client"),
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let poller = Arc::new(JobPoller::new(
        transport.clone(),
        store.clone(),
        clock.clone(),
        PollerConfig {
            interval: config.poll_interval(),
            max_attempts: config.max_poll_attempts,
        },
    ));
    let tracker = Arc::new(JobTracker::new(
        transport,
        store.clone(),
        poller,
        clock.clone(),
        config.local_fallback,
    ));

    // Notifications follow job transitions from the store
    let notifications = Arc::new(
        NotificationCenter::load(
            kv.namespace(&config.notification_namespace),
            config.notification_retention,
        )
        .await,
    );
    let sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LogSink), notifications.clone()];
    let emitter = NotificationEmitter::new(sinks, clock).spawn(store.subscribe());

    let resumed = tracker.resume().await;
    tracing::info!(resumed = resumed, "Job tracker ready");

    let state = AppState::new(tracker.clone(), notifications);

    // Build API routes
    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(50 * 1024 * 1024)); // 50 MB limit

    tracing::info!("Starting triage-tracker on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Shutting down, cancelling pending polls");
    tracker.shutdown();
    emitter.shutdown();
}

async fn open_kv(config: &AppConfig) -> Result<Arc<dyn KvStore>, KvError> {
    let kv: Arc<dyn KvStore> = match config.store_backend {
        StoreBackend::Memory => MemoryKvStore::new().namespace(&config.store_namespace),
        StoreBackend::File => {
            Arc::new(FileKvStore::open(&config.store_path, &config.store_namespace).await?)
        }
        StoreBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .expect("REDIS_URL must be set when STORE_BACKEND=redis");
            Arc::new(RedisKvStore::new(url, &config.store_namespace)?)
        }
    };
    Ok(kv)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
