use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub catalog: Option<CatalogConfig>,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration. The manifest and both task queues live in this file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("orbitflow.db")
}

/// Discovery poller configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollerConfig {
    /// Run the scheduled poll loop. The manual trigger works either way.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    /// Delay before the first scheduled cycle after startup.
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,
    /// Width of the catalog query window.
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: u64,
    /// The window ends this long before now; the catalog lags real time.
    #[serde(default = "default_min_age_minutes")]
    pub min_age_minutes: u64,
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_poll_interval_secs(),
            initial_delay_secs: default_initial_delay_secs(),
            lookback_minutes: default_lookback_minutes(),
            min_age_minutes: default_min_age_minutes(),
            query_timeout_secs: default_query_timeout_secs(),
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_secs() -> u64 {
    900
}

fn default_initial_delay_secs() -> u64 {
    10
}

fn default_lookback_minutes() -> u64 {
    30
}

fn default_min_age_minutes() -> u64 {
    60
}

fn default_query_timeout_secs() -> u64 {
    120
}

/// HTTP catalog endpoint used by the reference catalog client.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Base URL of the search endpoint (e.g., "https://catalog.example.org/api")
    pub url: String,
    /// Collection identifier passed with every query
    pub collection: String,
    /// Bearer token, if the catalog requires one
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default = "default_catalog_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_catalog_timeout_secs() -> u64 {
    30
}

/// Download stage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Idle sleep between queue polls, per worker.
    #[serde(default = "default_worker_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on a single fetch.
    #[serde(default = "default_stage_timeout_secs")]
    pub timeout_secs: u64,
    /// A DOWNLOADING record idle this long is reclaimed by the reaper.
    #[serde(default = "default_stuck_timeout_secs")]
    pub stuck_timeout_secs: u64,
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_worker_poll_interval_ms(),
            timeout_secs: default_stage_timeout_secs(),
            stuck_timeout_secs: default_stuck_timeout_secs(),
            raw_dir: default_raw_dir(),
            user_agent: default_user_agent(),
            retry: RetryConfig::default(),
        }
    }
}

impl DownloadConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_secs)
    }
}

fn default_workers() -> usize {
    2
}

fn default_worker_poll_interval_ms() -> u64 {
    1000
}

fn default_stage_timeout_secs() -> u64 {
    1800
}

fn default_stuck_timeout_secs() -> u64 {
    3600
}

fn default_raw_dir() -> PathBuf {
    PathBuf::from("raw")
}

fn default_user_agent() -> String {
    format!("orbitflow/{}", env!("CARGO_PKG_VERSION"))
}

/// Processing stage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_worker_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on a single transform run.
    #[serde(default = "default_stage_timeout_secs")]
    pub timeout_secs: u64,
    /// A PROCESSING record idle this long is reclaimed by the reaper.
    #[serde(default = "default_stuck_timeout_secs")]
    pub stuck_timeout_secs: u64,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_output_extension")]
    pub output_extension: String,
    /// Delete raw artifacts once a file reaches a terminal state.
    #[serde(default = "default_true")]
    pub cleanup_raw: bool,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub transform: TransformCommandConfig,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_worker_poll_interval_ms(),
            timeout_secs: default_stage_timeout_secs(),
            stuck_timeout_secs: default_stuck_timeout_secs(),
            output_dir: default_output_dir(),
            output_extension: default_output_extension(),
            cleanup_raw: true,
            retry: RetryConfig::default(),
            transform: TransformCommandConfig::default(),
        }
    }
}

impl ProcessingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_secs)
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("processed")
}

fn default_output_extension() -> String {
    "nc".to_string()
}

/// External transform tool invocation.
///
/// Arguments may contain `{input}`, `{output}`, `{file_id}` and `{timestamp}`
/// placeholders, substituted per job.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformCommandConfig {
    #[serde(default = "default_transform_program")]
    pub program: String,
    #[serde(default = "default_transform_args")]
    pub args: Vec<String>,
}

impl Default for TransformCommandConfig {
    fn default() -> Self {
        Self {
            program: default_transform_program(),
            args: default_transform_args(),
        }
    }
}

fn default_transform_program() -> String {
    "orbitflow-transform".to_string()
}

fn default_transform_args() -> Vec<String> {
    vec![
        "--input".to_string(),
        "{input}".to_string(),
        "--output".to_string(),
        "{output}".to_string(),
    ]
}

/// Retry configuration for one stage
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    /// Attempts allowed before the file is marked FAILED (including the first)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff: BackoffConfig::default(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

/// Backoff strategy between attempts.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum BackoffConfig {
    /// Same delay before every retry.
    Fixed { delay_secs: u64 },
    /// `initial * multiplier^(attempt - 1)`, capped at `max_delay_secs`.
    Exponential {
        #[serde(default = "default_initial_delay_secs_backoff")]
        initial_delay_secs: u64,
        #[serde(default = "default_max_delay_secs")]
        max_delay_secs: u64,
        #[serde(default = "default_multiplier")]
        multiplier: f64,
    },
    /// Explicit ladder; the last entry repeats once exhausted.
    Schedule { delays_secs: Vec<u64> },
}

impl BackoffConfig {
    /// Longest delay this strategy can produce, in seconds.
    pub fn longest_delay_secs(&self) -> u64 {
        match self {
            BackoffConfig::Fixed { delay_secs } => *delay_secs,
            BackoffConfig::Exponential { max_delay_secs, .. } => *max_delay_secs,
            BackoffConfig::Schedule { delays_secs } => {
                delays_secs.iter().copied().max().unwrap_or(0)
            }
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::Schedule {
            delays_secs: vec![60, 300, 900],
        }
    }
}

fn default_initial_delay_secs_backoff() -> u64 {
    60
}

fn default_max_delay_secs() -> u64 {
    3600
}

fn default_multiplier() -> f64 {
    2.0
}

/// Quality acceptance thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QualityConfig {
    #[serde(default = "default_max_missing_data_pct")]
    pub max_missing_data_pct: f64,
    /// Mean solar zenith above this means a night-time scene.
    #[serde(default = "default_max_solar_zenith_deg")]
    pub max_solar_zenith_deg: f64,
    /// Unset: saturation is recorded but never rejects.
    #[serde(default)]
    pub max_saturation_pct: Option<f64>,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            max_missing_data_pct: default_max_missing_data_pct(),
            max_solar_zenith_deg: default_max_solar_zenith_deg(),
            max_saturation_pct: None,
        }
    }
}

fn default_max_missing_data_pct() -> f64 {
    50.0
}

fn default_max_solar_zenith_deg() -> f64 {
    85.0
}

/// Stale-record reaper configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReaperConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_reaper_interval_secs")]
    pub interval_secs: u64,
    /// Queued-state records idle this long are pushed to their queue again.
    #[serde(default = "default_requeue_after_secs")]
    pub requeue_after_secs: u64,
    /// Maximum records handled per state per sweep.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_reaper_interval_secs(),
            requeue_after_secs: default_requeue_after_secs(),
            batch_size: default_batch_size(),
        }
    }
}

impl ReaperConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after_secs)
    }
}

fn default_reaper_interval_secs() -> u64 {
    60
}

fn default_requeue_after_secs() -> u64 {
    3600
}

fn default_batch_size() -> usize {
    100
}

/// Task queue configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// A claimed item not acknowledged within this window is delivered again.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout_secs(),
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

fn default_visibility_timeout_secs() -> u64 {
    7200
}

/// Metrics recorder configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderConfig {
    #[serde(default = "default_recorder_buffer")]
    pub buffer_size: usize,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_recorder_buffer(),
        }
    }
}

fn default_recorder_buffer() -> usize {
    1000
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub poller: PollerConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub catalog: Option<SanitizedCatalogConfig>,
    pub download: DownloadConfig,
    pub processing: ProcessingConfig,
    pub quality: QualityConfig,
    pub reaper: ReaperConfig,
    pub queue: QueueConfig,
    pub recorder: RecorderConfig,
}

/// Sanitized catalog config (token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedCatalogConfig {
    pub url: String,
    pub collection: String,
    pub api_token_configured: bool,
    pub timeout_secs: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            poller: config.poller.clone(),
            catalog: config.catalog.as_ref().map(|c| SanitizedCatalogConfig {
                url: c.url.clone(),
                collection: c.collection.clone(),
                api_token_configured: c.api_token.as_deref().is_some_and(|t| !t.is_empty()),
                timeout_secs: c.timeout_secs,
            }),
            download: config.download.clone(),
            processing: config.processing.clone(),
            quality: config.quality.clone(),
            reaper: config.reaper.clone(),
            queue: config.queue.clone(),
            recorder: config.recorder.clone(),
        }
    }
}
