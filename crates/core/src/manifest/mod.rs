//! Durable file manifest: one record per remote file, moved through its
//! lifecycle by conditional transitions.

mod sqlite_store;
mod store;
mod types;

pub use sqlite_store::SqliteManifestStore;
pub use store::{ManifestError, ManifestStore, MetricStore};
pub use types::{
    FileRecord, FileStatus, HealthCheck, HealthStatus, HourlyStats, ManifestFilter,
    MetricStatus, NewFile, QualityMetrics, QueryLogEntry, QueryStatus, ResourceUsage, Stage,
    StageMetric, StatusCount, Transition,
};
