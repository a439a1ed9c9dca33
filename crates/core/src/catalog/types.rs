use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PollerConfig;
use crate::manifest::NewFile;

/// One file listed by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub file_id: String,
    pub timestamp: DateTime<Utc>,
    pub satellite: String,
    pub product_type: String,
    pub size_mb: Option<f64>,
    pub source_locator: String,
}

impl From<&CatalogEntry> for NewFile {
    fn from(entry: &CatalogEntry) -> Self {
        NewFile {
            file_id: entry.file_id.clone(),
            timestamp: entry.timestamp,
            satellite: entry.satellite.clone(),
            product_type: entry.product_type.clone(),
            source_locator: entry.source_locator.clone(),
            file_size_mb: entry.size_mb,
        }
    }
}

/// Acquisition-time window of one catalog query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl QueryWindow {
    /// Window ending `min_age` before `now` and spanning `lookback`.
    pub fn ending_before(now: DateTime<Utc>, min_age: Duration, lookback: Duration) -> Self {
        let end = now - min_age;
        Self {
            start: end - lookback,
            end,
        }
    }

    pub fn from_config(config: &PollerConfig, now: DateTime<Utc>) -> Self {
        Self::ending_before(
            now,
            Duration::minutes(config.min_age_minutes as i64),
            Duration::minutes(config.lookback_minutes as i64),
        )
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}
