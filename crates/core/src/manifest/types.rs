//! Manifest record types and the file state graph.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Discovered,
    Queued,
    Downloading,
    Downloaded,
    ProcessingQueued,
    Processing,
    Complete,
    Retry,
    Failed,
    Skipped,
}

impl FileStatus {
    pub const ALL: [FileStatus; 10] = [
        FileStatus::Discovered,
        FileStatus::Queued,
        FileStatus::Downloading,
        FileStatus::Downloaded,
        FileStatus::ProcessingQueued,
        FileStatus::Processing,
        FileStatus::Complete,
        FileStatus::Retry,
        FileStatus::Failed,
        FileStatus::Skipped,
    ];

    /// Persisted name of the state.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Discovered => "DISCOVERED",
            FileStatus::Queued => "QUEUED",
            FileStatus::Downloading => "DOWNLOADING",
            FileStatus::Downloaded => "DOWNLOADED",
            FileStatus::ProcessingQueued => "PROCESSING_QUEUED",
            FileStatus::Processing => "PROCESSING",
            FileStatus::Complete => "COMPLETE",
            FileStatus::Retry => "RETRY",
            FileStatus::Failed => "FAILED",
            FileStatus::Skipped => "SKIPPED",
        }
    }

    /// Terminal states are never left.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FileStatus::Complete | FileStatus::Failed | FileStatus::Skipped
        )
    }

    /// States reachable in one step.
    pub fn successors(&self) -> &'static [FileStatus] {
        use FileStatus::*;
        match self {
            Discovered => &[Queued],
            Queued => &[Downloading],
            Downloading => &[Downloaded, Retry, Failed],
            Downloaded => &[ProcessingQueued],
            ProcessingQueued => &[Processing],
            Processing => &[Complete, Skipped, Retry, Failed],
            Retry => &[Downloading, Processing],
            Complete | Failed | Skipped => &[],
        }
    }

    pub fn can_transition_to(&self, target: FileStatus) -> bool {
        self.successors().contains(&target)
    }

    /// The stage a worker is actively running while in this state.
    pub fn active_stage(&self) -> Option<Stage> {
        match self {
            FileStatus::Downloading => Some(Stage::Download),
            FileStatus::Processing => Some(Stage::Processing),
            _ => None,
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FileStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown file status: {}", s))
    }
}

/// Pipeline stage that makes attempts on a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Download,
    Processing,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Download => "download",
            Stage::Processing => "processing",
        }
    }

    /// State a claimed file is in while this stage works on it.
    pub fn active_status(&self) -> FileStatus {
        match self {
            Stage::Download => FileStatus::Downloading,
            Stage::Processing => FileStatus::Processing,
        }
    }

    /// State a file waits in before its first attempt at this stage.
    pub fn queued_status(&self) -> FileStatus {
        match self {
            Stage::Download => FileStatus::Queued,
            Stage::Processing => FileStatus::ProcessingQueued,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "download" => Ok(Stage::Download),
            "processing" => Ok(Stage::Processing),
            other => Err(format!("unknown stage: {}", other)),
        }
    }
}

/// Quality figures reported by the transform for one scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub missing_data_pct: Option<f64>,
    #[serde(default)]
    pub saturation_pct: Option<f64>,
    #[serde(default)]
    pub mean_solar_zenith: Option<f64>,
}

/// The manifest row for one remote file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    /// Catalog-assigned identifier; unique.
    pub file_id: String,
    /// Acquisition time of the scene.
    pub timestamp: DateTime<Utc>,
    pub satellite: String,
    pub product_type: String,
    /// Where the transport fetches the bytes from.
    pub source_locator: String,
    pub status: FileStatus,
    /// Stage a RETRY record returns to.
    pub retry_stage: Option<Stage>,
    pub download_attempt: u32,
    pub processing_attempt: u32,
    pub error_message: Option<String>,
    pub skip_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub queued_at: Option<DateTime<Utc>>,
    pub download_started_at: Option<DateTime<Utc>>,
    pub downloaded_at: Option<DateTime<Utc>>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub raw_file_path: Option<String>,
    pub output_file_path: Option<String>,
    pub quality: QualityMetrics,
    pub file_size_mb: Option<f64>,
    pub download_duration_sec: Option<f64>,
    pub processing_duration_sec: Option<f64>,
}

impl FileRecord {
    pub fn attempts(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Download => self.download_attempt,
            Stage::Processing => self.processing_attempt,
        }
    }
}

/// A newly discovered file, as inserted by the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFile {
    pub file_id: String,
    pub timestamp: DateTime<Utc>,
    pub satellite: String,
    pub product_type: String,
    pub source_locator: String,
    pub file_size_mb: Option<f64>,
}

/// Field changes applied together with a status change.
///
/// Stage timestamps are not part of the builder: the store stamps the one
/// belonging to the target state, once.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub to: FileStatus,
    pub at: DateTime<Utc>,
    pub retry_stage: Option<Stage>,
    /// Raise the stage's attempt counter to at least this value.
    pub attempt_floor: Option<(Stage, u32)>,
    pub error_message: Option<String>,
    pub skip_reason: Option<String>,
    pub raw_file_path: Option<String>,
    pub output_file_path: Option<String>,
    pub quality: Option<QualityMetrics>,
    pub file_size_mb: Option<f64>,
    pub download_duration_sec: Option<f64>,
    pub processing_duration_sec: Option<f64>,
}

impl Transition {
    pub fn to(status: FileStatus) -> Self {
        Self {
            to: status,
            at: Utc::now(),
            retry_stage: None,
            attempt_floor: None,
            error_message: None,
            skip_reason: None,
            raw_file_path: None,
            output_file_path: None,
            quality: None,
            file_size_mb: None,
            download_duration_sec: None,
            processing_duration_sec: None,
        }
    }

    /// Move into RETRY, to be picked up again by `stage`.
    pub fn retry(stage: Stage, error: impl Into<String>) -> Self {
        Self {
            retry_stage: Some(stage),
            error_message: Some(error.into()),
            ..Self::to(FileStatus::Retry)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::to(FileStatus::Failed).with_error(error)
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_attempt_floor(mut self, stage: Stage, attempts: u32) -> Self {
        self.attempt_floor = Some((stage, attempts));
        self
    }

    pub fn with_skip_reason(mut self, reason: impl Into<String>) -> Self {
        self.skip_reason = Some(reason.into());
        self
    }

    pub fn with_raw_file_path(mut self, path: impl Into<String>) -> Self {
        self.raw_file_path = Some(path.into());
        self
    }

    pub fn with_output_file_path(mut self, path: impl Into<String>) -> Self {
        self.output_file_path = Some(path.into());
        self
    }

    pub fn with_quality(mut self, quality: QualityMetrics) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_file_size_mb(mut self, size: f64) -> Self {
        self.file_size_mb = Some(size);
        self
    }

    pub fn with_download_duration(mut self, secs: f64) -> Self {
        self.download_duration_sec = Some(secs);
        self
    }

    pub fn with_processing_duration(mut self, secs: f64) -> Self {
        self.processing_duration_sec = Some(secs);
        self
    }

    /// The stage whose attempt begins with this transition.
    pub fn starts_stage(&self) -> Option<Stage> {
        self.to.active_stage()
    }
}

/// Filter for querying file records.
#[derive(Debug, Clone)]
pub struct ManifestFilter {
    pub status: Option<FileStatus>,
    pub satellite: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

impl Default for ManifestFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifestFilter {
    pub fn new() -> Self {
        Self {
            status: None,
            satellite: None,
            limit: 100,
            offset: 0,
        }
    }

    pub fn with_status(mut self, status: FileStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_satellite(mut self, satellite: impl Into<String>) -> Self {
        self.satellite = Some(satellite.into());
        self
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }
}

/// Outcome recorded for one stage attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricStatus {
    Success,
    Failed,
    Skipped,
}

impl MetricStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricStatus::Success => "SUCCESS",
            MetricStatus::Failed => "FAILED",
            MetricStatus::Skipped => "SKIPPED",
        }
    }
}

impl FromStr for MetricStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(MetricStatus::Success),
            "FAILED" => Ok(MetricStatus::Failed),
            "SKIPPED" => Ok(MetricStatus::Skipped),
            other => Err(format!("unknown metric status: {}", other)),
        }
    }
}

/// Resource figures for an attempt, when the collaborator reports them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub memory_mb: Option<f64>,
    pub cpu_percent: Option<f64>,
}

/// One row of `processing_metrics`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageMetric {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub file_id: String,
    pub stage: Stage,
    pub attempt: u32,
    pub duration_seconds: f64,
    pub status: MetricStatus,
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub resources: ResourceUsage,
    pub recorded_at: DateTime<Utc>,
}

impl StageMetric {
    pub fn new(
        file_id: impl Into<String>,
        stage: Stage,
        attempt: u32,
        duration_seconds: f64,
        status: MetricStatus,
    ) -> Self {
        Self {
            id: None,
            file_id: file_id.into(),
            stage,
            attempt,
            duration_seconds,
            status,
            error_message: None,
            resources: ResourceUsage::default(),
            recorded_at: Utc::now(),
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }

    pub fn with_resources(mut self, resources: ResourceUsage) -> Self {
        self.resources = resources;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryStatus {
    Success,
    Failed,
}

impl QueryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryStatus::Success => "SUCCESS",
            QueryStatus::Failed => "FAILED",
        }
    }
}

/// One row of `api_query_log`: a single catalog poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub query_timestamp: DateTime<Utc>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub files_found: u32,
    pub files_new: u32,
    pub query_duration_sec: f64,
    pub status: QueryStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "HEALTHY",
            HealthStatus::Degraded => "DEGRADED",
            HealthStatus::Unhealthy => "UNHEALTHY",
        }
    }
}

/// One row of `health_checks`, written by a liveness probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub service: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub response_time_ms: Option<f64>,
    pub checked_at: DateTime<Utc>,
}

/// Row of the rolling 24h status summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusCount {
    pub status: FileStatus,
    pub count: i64,
}

/// Row of the hourly processing aggregate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyStats {
    /// Hour bucket, `YYYY-MM-DD HH:00:00` UTC.
    pub hour: String,
    pub files_processed: i64,
    pub files_complete: i64,
    pub files_skipped: i64,
    pub files_failed: i64,
    pub avg_processing_duration_sec: Option<f64>,
    pub avg_quality_score: Option<f64>,
}
