//! Byte transport boundary: moves a remote file onto local disk.

mod http;

pub use http::HttpFetcher;
pub(crate) use http::sanitize;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while fetching a file.
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed (connection, TLS, body read).
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The source does not exist (any more).
    #[error("Source not found: {0}")]
    NotFound(String),

    /// Transport answered with an unexpected status.
    #[error("Transport returned status {status}")]
    Status { status: u16 },

    /// Fetch did not finish in time.
    #[error("Download timed out after {timeout_secs} seconds")]
    Timeout { timeout_secs: u64 },

    /// The bytes arrived but are unusable.
    #[error("Downloaded artifact is corrupt: {0}")]
    Corrupt(String),

    /// I/O error writing the artifact.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    /// Whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::HttpError(_) | FetchError::Timeout { .. } | FetchError::Io(_) => true,
            FetchError::Status { status } => *status >= 500 || *status == 429,
            FetchError::NotFound(_) | FetchError::Corrupt(_) => false,
        }
    }
}

/// A request to bring one file onto local disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    pub file_id: String,
    pub source_locator: String,
    /// Directory the artifact is written into; created if missing.
    pub dest_dir: PathBuf,
}

/// A file that landed on local disk.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
}

impl FetchedArtifact {
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Transport for raw satellite files.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Name of this transport (for logging).
    fn name(&self) -> &str;

    /// Fetch the file. On error, partial output may be left in `dest_dir`.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedArtifact, FetchError>;
}
