use garde::Validate;
use serde::Deserialize;
use std::time::Duration;

/// Which key-value backend persists tracked jobs and notifications.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    File,
    Redis,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    /// Base URL of the remote inference API (no trailing slash)
    #[garde(length(min = 1))]
    pub inference_api_base: String,

    /// Shared secret sent as `x-api-key` on every inference API request
    #[garde(skip)]
    pub inference_api_key: String,

    /// Job persistence backend
    #[serde(default = "default_store_backend")]
    #[garde(skip)]
    pub store_backend: StoreBackend,

    /// JSON file used by the `file` backend
    #[serde(default = "default_store_path")]
    #[garde(length(min = 1))]
    pub store_path: String,

    /// Namespace (file section / Redis hash) holding tracked jobs
    #[serde(default = "default_store_namespace")]
    #[garde(length(min = 1))]
    pub store_namespace: String,

    /// Namespace holding the notification inbox
    #[serde(default = "default_notification_namespace")]
    #[garde(length(min = 1))]
    pub notification_namespace: String,

    /// Most notifications kept in the inbox; older ones are dropped
    #[serde(default = "default_notification_retention")]
    #[garde(range(min = 1))]
    pub notification_retention: usize,

    /// Redis connection string, required for the `redis` backend
    #[garde(skip)]
    pub redis_url: Option<String>,

    /// Delay between status polls for one job
    #[serde(default = "default_poll_interval_ms")]
    #[garde(range(min = 1))]
    pub poll_interval_ms: u64,

    /// Poll budget per job before it is marked timed out
    #[serde(default = "default_max_poll_attempts")]
    #[garde(range(min = 1))]
    pub max_poll_attempts: u32,

    /// Simulate processing locally when the inference API rejects or cannot take an upload
    #[serde(default = "default_local_fallback")]
    #[garde(skip)]
    pub local_fallback: bool,

    /// Per-request timeout for inference API calls
    #[serde(default = "default_request_timeout_secs")]
    #[garde(range(min = 1))]
    pub request_timeout_secs: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::File
}

fn default_store_path() -> String {
    "triage_jobs.json".to_string()
}

fn default_store_namespace() -> String {
    "triage:jobs".to_string()
}

fn default_notification_namespace() -> String {
    "triage:notifications".to_string()
}

fn default_notification_retention() -> usize {
    500
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_poll_attempts() -> u32 {
    30
}

fn default_local_fallback() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Parse and validate configuration from key/value pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: AppConfig = envy::from_iter(vars)?;
        config.validate()?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Env(#[from] envy::Error),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] garde::Report),
}
