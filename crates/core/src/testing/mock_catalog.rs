//! Mock catalog for testing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::catalog::{CatalogClient, CatalogEntry, CatalogError, QueryWindow};

/// Mock implementation of the CatalogClient trait.
///
/// Returns the configured entries for every query, whatever the window,
/// and records the windows it was asked about.
#[derive(Debug, Default)]
pub struct MockCatalog {
    entries: Arc<RwLock<Vec<CatalogEntry>>>,
    /// If set, the next query fails with this error.
    next_error: Arc<RwLock<Option<CatalogError>>>,
    windows: Arc<RwLock<Vec<QueryWindow>>>,
    delay: Option<Duration>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every query.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub async fn set_entries(&self, entries: Vec<CatalogEntry>) {
        *self.entries.write().await = entries;
    }

    pub async fn set_next_error(&self, error: CatalogError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn query_count(&self) -> usize {
        self.windows.read().await.len()
    }

    pub async fn recorded_windows(&self) -> Vec<QueryWindow> {
        self.windows.read().await.clone()
    }
}

#[async_trait]
impl CatalogClient for MockCatalog {
    fn name(&self) -> &str {
        "mock"
    }

    async fn query(&self, window: &QueryWindow) -> Result<Vec<CatalogEntry>, CatalogError> {
        self.windows.write().await.push(*window);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.next_error.write().await.take() {
            return Err(error);
        }
        Ok(self.entries.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use chrono::Utc;

    #[tokio::test]
    async fn test_error_is_consumed_once() {
        let catalog = MockCatalog::new();
        catalog.set_entries(vec![fixtures::catalog_entry("A")]).await;
        catalog.set_next_error(CatalogError::RateLimitExceeded).await;
        let window = QueryWindow {
            start: Utc::now(),
            end: Utc::now(),
        };

        assert!(catalog.query(&window).await.is_err());
        assert_eq!(catalog.query(&window).await.unwrap().len(), 1);
        assert_eq!(catalog.query_count().await, 2);
    }
}
