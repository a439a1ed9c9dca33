//! Mock transform tool for testing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::manifest::{QualityMetrics, ResourceUsage};
use crate::transform::{TransformError, TransformJob, TransformOutput, Transformer};

/// A scripted transform failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformFailure {
    /// Retryable.
    Crash,
    /// Retryable.
    Timeout,
    /// Permanent.
    CorruptInput,
}

impl TransformFailure {
    fn into_error(self) -> TransformError {
        match self {
            TransformFailure::Crash => {
                TransformError::failed("tool exited with code Some(1)", None)
            }
            TransformFailure::Timeout => TransformError::Timeout { timeout_secs: 1 },
            TransformFailure::CorruptInput => TransformError::CorruptInput {
                reason: "truncated header".to_string(),
            },
        }
    }
}

/// Mock implementation of the Transformer trait.
///
/// Writes a placeholder product to the job's output path and reports the
/// quality configured for the file, or the default quality.
#[derive(Debug)]
pub struct MockTransformer {
    default_quality: Arc<RwLock<QualityMetrics>>,
    quality: Arc<RwLock<HashMap<String, QualityMetrics>>>,
    failures: Arc<RwLock<HashMap<String, Vec<TransformFailure>>>>,
    jobs: Arc<RwLock<Vec<TransformJob>>>,
    delay: Option<Duration>,
}

impl Default for MockTransformer {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransformer {
    pub fn new() -> Self {
        Self {
            default_quality: Arc::new(RwLock::new(super::fixtures::good_quality())),
            quality: Arc::new(RwLock::new(HashMap::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
            jobs: Arc::new(RwLock::new(Vec::new())),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn set_default_quality(&self, quality: QualityMetrics) {
        *self.default_quality.write().await = quality;
    }

    pub async fn set_quality(&self, file_id: &str, quality: QualityMetrics) {
        self.quality
            .write()
            .await
            .insert(file_id.to_string(), quality);
    }

    pub async fn script_failures(&self, file_id: &str, failures: Vec<TransformFailure>) {
        self.failures
            .write()
            .await
            .insert(file_id.to_string(), failures);
    }

    pub async fn recorded_jobs(&self) -> Vec<TransformJob> {
        self.jobs.read().await.clone()
    }

    pub async fn transform_count(&self, file_id: &str) -> usize {
        self.jobs
            .read()
            .await
            .iter()
            .filter(|j| j.file_id == file_id)
            .count()
    }
}

#[async_trait]
impl Transformer for MockTransformer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn transform(&self, job: &TransformJob) -> Result<TransformOutput, TransformError> {
        self.jobs.write().await.push(job.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = {
            let mut failures = self.failures.write().await;
            match failures.get_mut(&job.file_id) {
                Some(script) if !script.is_empty() => Some(script.remove(0)),
                _ => None,
            }
        };
        if let Some(failure) = failure {
            return Err(failure.into_error());
        }

        if let Some(parent) = job.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&job.output_path, b"CDF\x01").await?;

        let quality = match self.quality.read().await.get(&job.file_id) {
            Some(q) => q.clone(),
            None => self.default_quality.read().await.clone(),
        };

        Ok(TransformOutput {
            output_path: job.output_path.clone(),
            quality,
            resources: ResourceUsage {
                memory_mb: Some(256.0),
                cpu_percent: Some(85.0),
            },
        })
    }
}
