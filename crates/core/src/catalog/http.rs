//! JSON-over-HTTP catalog client.
//!
//! Expects `GET {url}/products?collection=..&start=..&end=..` to answer with
//! `{"products": [{"id", "sensing_time", "satellite", "product_type",
//! "size_mb", "download_url"}]}`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{CatalogClient, CatalogEntry, CatalogError, QueryWindow};
use crate::config::CatalogConfig;

#[derive(Debug, Deserialize)]
struct ProductsResponse {
    #[serde(default)]
    products: Vec<ProductResult>,
}

#[derive(Debug, Deserialize)]
struct ProductResult {
    id: String,
    sensing_time: DateTime<Utc>,
    satellite: String,
    product_type: String,
    #[serde(default)]
    size_mb: Option<f64>,
    download_url: String,
}

impl From<ProductResult> for CatalogEntry {
    fn from(p: ProductResult) -> Self {
        CatalogEntry {
            file_id: p.id,
            timestamp: p.sensing_time,
            satellite: p.satellite,
            product_type: p.product_type,
            size_mb: p.size_mb,
            source_locator: p.download_url,
        }
    }
}

/// Catalog client for a JSON search endpoint.
pub struct HttpCatalogClient {
    client: Client,
    base_url: String,
    collection: String,
    api_token: Option<String>,
}

impl HttpCatalogClient {
    pub fn new(config: &CatalogConfig) -> Result<Self, CatalogError> {
        if config.url.trim().is_empty() {
            return Err(CatalogError::NotConfigured(
                "catalog.url is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_token: config.api_token.clone().filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl CatalogClient for HttpCatalogClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn query(&self, window: &QueryWindow) -> Result<Vec<CatalogEntry>, CatalogError> {
        let url = format!("{}/products", self.base_url);
        let start = window.start.to_rfc3339_opts(SecondsFormat::Secs, true);
        let end = window.end.to_rfc3339_opts(SecondsFormat::Secs, true);

        debug!(
            "Catalog query: collection='{}', window={}..{}",
            self.collection, start, end
        );

        let mut request = self.client.get(&url).query(&[
            ("collection", self.collection.as_str()),
            ("start", start.as_str()),
            ("end", end.as_str()),
        ]);
        if let Some(ref token) = self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        let status = response.status();
        if status == 401 || status == 403 {
            return Err(CatalogError::NotConfigured(
                "catalog rejected the credentials".to_string(),
            ));
        }
        if status == 429 {
            return Err(CatalogError::RateLimitExceeded);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let result: ProductsResponse = response.json().await.map_err(|e| {
            CatalogError::ParseError(format!("Failed to parse products response: {}", e))
        })?;

        Ok(result.products.into_iter().map(CatalogEntry::from).collect())
    }
}
