use std::sync::Arc;

use orbitflow_core::{
    Config, ManifestStore, MetricStore, PipelineRunner, SanitizedConfig, TaskQueue,
};

/// Shared application state
pub struct AppState {
    config: Config,
    manifest: Arc<dyn ManifestStore>,
    metric_store: Arc<dyn MetricStore>,
    queue: Arc<dyn TaskQueue>,
    runner: Arc<PipelineRunner>,
}

impl AppState {
    pub fn new(
        config: Config,
        manifest: Arc<dyn ManifestStore>,
        metric_store: Arc<dyn MetricStore>,
        queue: Arc<dyn TaskQueue>,
        runner: Arc<PipelineRunner>,
    ) -> Self {
        Self {
            config,
            manifest,
            metric_store,
            queue,
            runner,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn manifest(&self) -> &dyn ManifestStore {
        self.manifest.as_ref()
    }

    pub fn metric_store(&self) -> &dyn MetricStore {
        self.metric_store.as_ref()
    }

    pub fn queue(&self) -> &dyn TaskQueue {
        self.queue.as_ref()
    }

    pub fn runner(&self) -> &PipelineRunner {
        self.runner.as_ref()
    }
}
