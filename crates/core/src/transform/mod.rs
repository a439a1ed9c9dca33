//! Scientific transform boundary: raw artifact in, product plus quality
//! figures out.

mod command;

pub use command::CommandTransformer;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::manifest::{QualityMetrics, ResourceUsage};

/// Errors that can occur during a transform.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Transform tool not found.
    #[error("Transform tool not found: {program}")]
    ToolNotFound { program: String },

    /// The raw input cannot be processed, now or later.
    #[error("Corrupt input: {reason}")]
    CorruptInput { reason: String },

    /// Transform ran and failed.
    #[error("Transform failed: {reason}")]
    Failed {
        reason: String,
        stderr: Option<String>,
    },

    /// Transform timed out.
    #[error("Transform timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// Quality report could not be read.
    #[error("Failed to parse quality report: {reason}")]
    ParseError { reason: String },

    /// I/O error around the transform.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransformError {
    pub fn failed(reason: impl Into<String>, stderr: Option<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
            stderr,
        }
    }

    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Io(_) | Self::Failed { .. }
        )
    }
}

/// One raw artifact to turn into a product.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformJob {
    pub file_id: String,
    pub raw_path: PathBuf,
    pub output_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

/// A product written by the transform.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutput {
    pub output_path: PathBuf,
    pub quality: QualityMetrics,
    pub resources: ResourceUsage,
}

/// Produces a processed product from a raw artifact.
#[async_trait]
pub trait Transformer: Send + Sync {
    /// Name of this transformer (for logging).
    fn name(&self) -> &str;

    /// Run the transform. The output path's parent directory may not exist yet.
    async fn transform(&self, job: &TransformJob) -> Result<TransformOutput, TransformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(TransformError::Timeout { timeout_secs: 1 }.is_retryable());
        assert!(TransformError::failed("exit 1", None).is_retryable());
        assert!(!TransformError::CorruptInput {
            reason: "bad header".to_string()
        }
        .is_retryable());
        assert!(!TransformError::ToolNotFound {
            program: "x".to_string()
        }
        .is_retryable());
        assert!(!TransformError::ParseError {
            reason: "x".to_string()
        }
        .is_retryable());
    }
}
