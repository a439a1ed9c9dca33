//! Manifest storage traits and errors.

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::types::{
    FileRecord, FileStatus, HealthCheck, HourlyStats, ManifestFilter, NewFile, QueryLogEntry,
    StageMetric, StatusCount, Transition,
};

/// Error type for manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("File not found: {0}")]
    NotFound(String),

    /// The record was not in any of the expected states. Another actor got
    /// there first; callers treat this as a no-op.
    #[error("Stale transition for {file_id}: expected one of {expected:?}, found {actual}")]
    StaleTransition {
        file_id: String,
        expected: Vec<FileStatus>,
        actual: FileStatus,
    },

    #[error("Illegal transition {from} -> {to}")]
    IllegalTransition { from: FileStatus, to: FileStatus },

    #[error("Database error: {0}")]
    Database(String),

    /// A stored value could not be decoded into its record type.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ManifestError {
    pub fn is_stale(&self) -> bool {
        matches!(self, ManifestError::StaleTransition { .. })
    }
}

impl From<rusqlite::Error> for ManifestError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::FromSqlConversionFailure(..)
            | rusqlite::Error::InvalidColumnType(..) => ManifestError::Serialization(e.to_string()),
            other => ManifestError::Database(other.to_string()),
        }
    }
}

/// Durable record of every file the pipeline knows about.
///
/// Status changes go exclusively through [`ManifestStore::transition`], which
/// only applies when the stored state is one of the expected states.
pub trait ManifestStore: Send + Sync {
    /// Insert a file as DISCOVERED. Returns `false` if the file_id is already known.
    fn insert_discovered(&self, file: &NewFile) -> Result<bool, ManifestError>;

    fn get(&self, file_id: &str) -> Result<Option<FileRecord>, ManifestError>;

    /// List records, newest acquisition first.
    fn list(&self, filter: &ManifestFilter) -> Result<Vec<FileRecord>, ManifestError>;

    /// Count records matching the filter (ignores limit/offset).
    fn count(&self, filter: &ManifestFilter) -> Result<i64, ManifestError>;

    /// Conditionally move a record to `change.to`.
    ///
    /// Fails with `StaleTransition` when the current state is not in
    /// `expected`, leaving the record untouched.
    fn transition(
        &self,
        file_id: &str,
        expected: &[FileStatus],
        change: Transition,
    ) -> Result<FileRecord, ManifestError>;

    /// Refresh `updated_at` if the record is still in `status`.
    fn touch(&self, file_id: &str, status: FileStatus) -> Result<bool, ManifestError>;

    /// Records in one of `statuses` whose `updated_at` is older than `older_than`.
    fn find_stale(
        &self,
        statuses: &[FileStatus],
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FileRecord>, ManifestError>;

    /// Delete a record together with its stage metrics.
    fn purge(&self, file_id: &str) -> Result<FileRecord, ManifestError>;

    /// Status counts for files acquired in the last 24 hours.
    fn status_summary(&self) -> Result<Vec<StatusCount>, ManifestError>;

    /// Per-hour processing aggregates, most recent hour first.
    fn hourly_stats(&self, limit: usize) -> Result<Vec<HourlyStats>, ManifestError>;

    fn record_query(&self, entry: &QueryLogEntry) -> Result<i64, ManifestError>;

    /// Most recent catalog polls first.
    fn recent_queries(&self, limit: usize) -> Result<Vec<QueryLogEntry>, ManifestError>;

    fn record_health_check(&self, check: &HealthCheck) -> Result<i64, ManifestError>;

    fn recent_health_checks(&self, limit: usize) -> Result<Vec<HealthCheck>, ManifestError>;
}

/// Append-only store of per-attempt stage metrics.
pub trait MetricStore: Send + Sync {
    fn append_metric(&self, metric: &StageMetric) -> Result<i64, ManifestError>;

    /// Metrics for one file in recording order.
    fn metrics_for(&self, file_id: &str) -> Result<Vec<StageMetric>, ManifestError>;
}
