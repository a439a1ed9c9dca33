//! Mock byte transport for testing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::fetcher::{sanitize, FetchError, FetchRequest, FetchedArtifact, Fetcher};

/// A scripted fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    /// Retryable.
    Timeout,
    /// Retryable.
    ServerError,
    /// Permanent.
    NotFound,
    /// Permanent.
    Corrupt,
}

impl FetchFailure {
    fn into_error(self, file_id: &str) -> FetchError {
        match self {
            FetchFailure::Timeout => FetchError::Timeout { timeout_secs: 1 },
            FetchFailure::ServerError => FetchError::Status { status: 503 },
            FetchFailure::NotFound => FetchError::NotFound(file_id.to_string()),
            FetchFailure::Corrupt => FetchError::Corrupt("checksum mismatch".to_string()),
        }
    }
}

/// Mock implementation of the Fetcher trait.
///
/// Writes a small payload to `dest_dir/<file_id>.raw` unless a failure is
/// scripted for the file. Scripted failures are consumed in order; once
/// exhausted, fetches succeed.
#[derive(Debug)]
pub struct MockFetcher {
    failures: Arc<RwLock<HashMap<String, Vec<FetchFailure>>>>,
    requests: Arc<RwLock<Vec<FetchRequest>>>,
    payload: Vec<u8>,
    delay: Option<Duration>,
}

impl Default for MockFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockFetcher {
    pub fn new() -> Self {
        Self {
            failures: Arc::new(RwLock::new(HashMap::new())),
            requests: Arc::new(RwLock::new(Vec::new())),
            payload: vec![0u8; 2048],
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_payload_size(mut self, bytes: usize) -> Self {
        self.payload = vec![0u8; bytes];
        self
    }

    pub async fn script_failures(&self, file_id: &str, failures: Vec<FetchFailure>) {
        self.failures
            .write()
            .await
            .insert(file_id.to_string(), failures);
    }

    pub async fn recorded_requests(&self) -> Vec<FetchRequest> {
        self.requests.read().await.clone()
    }

    /// Number of fetches attempted for `file_id`.
    pub async fn fetch_count(&self, file_id: &str) -> usize {
        self.requests
            .read()
            .await
            .iter()
            .filter(|r| r.file_id == file_id)
            .count()
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchedArtifact, FetchError> {
        self.requests.write().await.push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failure = {
            let mut failures = self.failures.write().await;
            match failures.get_mut(&request.file_id) {
                Some(script) if !script.is_empty() => Some(script.remove(0)),
                _ => None,
            }
        };
        if let Some(failure) = failure {
            return Err(failure.into_error(&request.file_id));
        }

        tokio::fs::create_dir_all(&request.dest_dir).await?;
        let path = request
            .dest_dir
            .join(format!("{}.raw", sanitize(&request.file_id)));
        tokio::fs::write(&path, &self.payload).await?;

        Ok(FetchedArtifact {
            path,
            size_bytes: self.payload.len() as u64,
        })
    }
}
