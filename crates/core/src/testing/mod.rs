//! Testing utilities and mock collaborators.
//!
//! The mocks stand in for the catalog, the byte transport and the transform
//! tool so the whole pipeline can run in-process against temporary stores.
//!
//! # Example
//!
//! ```rust,ignore
//! use orbitflow_core::testing::{fixtures, FetchFailure, MockCatalog, MockFetcher};
//!
//! let catalog = MockCatalog::new();
//! catalog.set_entries(vec![fixtures::catalog_entry("A")]).await;
//!
//! let fetcher = MockFetcher::new();
//! fetcher.script_failures("A", vec![FetchFailure::Timeout]).await;
//! ```

mod mock_catalog;
mod mock_fetcher;
mod mock_transformer;

pub use mock_catalog::MockCatalog;
pub use mock_fetcher::{FetchFailure, MockFetcher};
pub use mock_transformer::{MockTransformer, TransformFailure};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use chrono::{DateTime, Duration, TimeZone, Utc};

    use crate::catalog::CatalogEntry;
    use crate::config::{BackoffConfig, Config, RetryConfig};
    use crate::manifest::{NewFile, QualityMetrics};

    /// Acquisition time used by every fixture.
    pub fn scene_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, 42, 42).unwrap()
    }

    /// Catalog entry for `file_id`, acquired at [`scene_time`].
    pub fn catalog_entry(file_id: &str) -> CatalogEntry {
        CatalogEntry {
            file_id: file_id.to_string(),
            timestamp: scene_time(),
            satellite: "MSG4".to_string(),
            product_type: "HRSEVIRI".to_string(),
            size_mb: Some(230.0),
            source_locator: format!("https://data.example.org/products/{}", file_id),
        }
    }

    /// Catalog entry acquired `minutes` after [`scene_time`].
    pub fn catalog_entry_at(file_id: &str, minutes: i64) -> CatalogEntry {
        CatalogEntry {
            timestamp: scene_time() + Duration::minutes(minutes),
            ..catalog_entry(file_id)
        }
    }

    pub fn new_file(file_id: &str) -> NewFile {
        NewFile::from(&catalog_entry(file_id))
    }

    /// Quality figures that pass the default acceptance policy.
    pub fn good_quality() -> QualityMetrics {
        QualityMetrics {
            quality_score: None,
            missing_data_pct: Some(2.5),
            saturation_pct: Some(0.1),
            mean_solar_zenith: Some(42.0),
        }
    }

    /// Config for in-process pipeline tests: artifacts under `dir`, no
    /// backoff delay, fast idle polling.
    pub fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.database.path = dir.join("orbitflow.db");

        config.download.raw_dir = dir.join("raw");
        config.download.workers = 2;
        config.download.poll_interval_ms = 10;
        config.download.timeout_secs = 5;
        config.download.retry = no_delay_retry(3);

        config.processing.output_dir = dir.join("output");
        config.processing.workers = 2;
        config.processing.poll_interval_ms = 10;
        config.processing.timeout_secs = 5;
        config.processing.retry = no_delay_retry(3);

        config.poller.enabled = false;
        config
    }

    pub fn no_delay_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff: BackoffConfig::Fixed { delay_secs: 0 },
        }
    }
}
