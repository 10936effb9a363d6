use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Empty means the service runs on the
    /// in-memory stores (single-process deployments and tests).
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u32,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent dispatch workers to run.
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Poll interval when the queue is empty, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Random jitter added to the poll interval, in milliseconds.
    #[serde(default = "default_poll_jitter")]
    pub poll_jitter_ms: u64,
    /// Deadline for a single provider send.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_seconds: u64,
    /// Back-off after a storage error in the loop, in milliseconds.
    #[serde(default = "default_error_backoff")]
    pub error_backoff_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweepConfig {
    /// Interval between maintenance sweeps in seconds.
    #[serde(default = "default_sweep_interval")]
    pub interval_seconds: u64,
    /// Processing rows older than this are returned to the queue.
    #[serde(default = "default_stale_after")]
    pub stale_after_minutes: u64,
    /// Failed deliveries older than this become retry candidates.
    #[serde(default = "default_retry_after")]
    pub retry_after_minutes: u64,
    /// Retry budget per delivery; at or over this the row is a dead letter.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// Interval between retention passes in seconds.
    #[serde(default = "default_retention_interval")]
    pub interval_seconds: u64,
    /// Terminal queue rows are purged after this many days.
    #[serde(default = "default_queue_retention")]
    pub queue_retention_days: i64,
    /// Terminal delivery rows are deleted after this many days.
    #[serde(default = "default_delivery_retention")]
    pub delivery_retention_days: i64,
    /// Log rows are moved to the archive table after this many days.
    #[serde(default = "default_log_archive")]
    pub log_archive_days: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderConfig {
    /// Webhook providers registered at startup.
    #[serde(default)]
    pub webhooks: Vec<WebhookProviderConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookProviderConfig {
    pub id: String,
    /// Channel this provider serves (e.g. "webhook", "callback").
    pub channel: String,
    #[serde(default)]
    pub priority: i32,
    /// Preferred provider for the channel.
    #[serde(default)]
    pub default: bool,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_webhook_timeout")]
    pub timeout_seconds: u64,
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u32 {
    5
}

fn default_idle_timeout() -> u32 {
    300
}

fn default_worker_count() -> usize {
    2
}

fn default_poll_interval() -> u64 {
    500
}

fn default_poll_jitter() -> u64 {
    100
}

fn default_provider_timeout() -> u64 {
    30
}

fn default_error_backoff() -> u64 {
    1_000
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_stale_after() -> u64 {
    5
}

fn default_retry_after() -> u64 {
    10
}

fn default_max_attempts() -> i32 {
    3
}

fn default_retention_interval() -> u64 {
    3_600
}

fn default_queue_retention() -> i64 {
    7
}

fn default_delivery_retention() -> i64 {
    30
}

fn default_log_archive() -> i64 {
    90
}

fn default_webhook_timeout() -> u64 {
    10
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // DATABASE_URL, WORKER_COUNT, SWEEP_MAX_ATTEMPTS, etc.
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    /// Whether PostgreSQL persistence is configured.
    pub fn has_database(&self) -> bool {
        !self.database.url.trim().is_empty()
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval(),
            poll_jitter_ms: default_poll_jitter(),
            provider_timeout_seconds: default_provider_timeout(),
            error_backoff_ms: default_error_backoff(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_sweep_interval(),
            stale_after_minutes: default_stale_after(),
            retry_after_minutes: default_retry_after(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_retention_interval(),
            queue_retention_days: default_queue_retention(),
            delivery_retention_days: default_delivery_retention(),
            log_archive_days: default_log_archive(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            worker: WorkerConfig::default(),
            sweep: SweepConfig::default(),
            retention: RetentionConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}
