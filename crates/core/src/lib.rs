pub mod catalog;
pub mod config;
mod db;
pub mod fetcher;
pub mod manifest;
pub mod metrics;
pub mod poller;
pub mod policy;
pub mod queue;
pub mod recorder;
pub mod testing;
pub mod transform;
pub mod worker;

pub use catalog::{CatalogClient, CatalogEntry, CatalogError, HttpCatalogClient, QueryWindow};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use fetcher::{FetchError, Fetcher, HttpFetcher};
pub use manifest::{
    FileRecord, FileStatus, ManifestError, ManifestFilter, ManifestStore, MetricStore,
    SqliteManifestStore, Stage, StageMetric,
};
pub use poller::{DiscoveryPoller, PollError, PollReport};
pub use queue::{QueueName, SqliteTaskQueue, TaskQueue};
pub use recorder::{create_recorder, RecorderHandle, RecorderWriter};
pub use transform::{CommandTransformer, TransformError, Transformer};
pub use worker::{PipelineRunner, PipelineStatus, StageOutcome};
