//! Remote product catalog boundary.
//!
//! The poller only needs "which files exist in this time window"; the
//! catalog's own query language stays behind [`CatalogClient`].

mod http;
mod types;

pub use http::HttpCatalogClient;
pub use types::{CatalogEntry, QueryWindow};

use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur when querying the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded, please wait before retrying")]
    RateLimitExceeded,

    /// Catalog returned an error.
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// Failed to parse response.
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Client not configured (bad credentials, missing URL).
    #[error("Client not configured: {0}")]
    NotConfigured(String),
}

impl CatalogError {
    /// Whether the next poll cycle can reasonably expect a different result.
    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogError::HttpError(_) | CatalogError::RateLimitExceeded => true,
            CatalogError::ApiError { status, .. } => *status >= 500,
            CatalogError::ParseError(_) | CatalogError::NotConfigured(_) => false,
        }
    }
}

/// Lists files available in a time window.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Name of this catalog (for logging).
    fn name(&self) -> &str;

    /// Files whose acquisition time falls in `window`.
    async fn query(&self, window: &QueryWindow) -> Result<Vec<CatalogEntry>, CatalogError>;
}
