//! Common test utilities for API testing with mocks.
//!
//! `TestFixture` builds the real router over file-backed stores in a temp
//! directory, with the catalog, fetcher and transform tool replaced by
//! the mocks from `orbitflow_core::testing`.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use orbitflow_core::testing::{MockCatalog, MockFetcher, MockTransformer};
use orbitflow_core::{
    create_recorder, CatalogClient, Config, ManifestStore, MetricStore, PipelineRunner,
    SqliteManifestStore, SqliteTaskQueue, TaskQueue,
};
use orbitflow_server::state::AppState;

/// Re-export fixtures for test convenience
pub use orbitflow_core::testing::fixtures;

pub struct TestFixture {
    pub router: Router,
    pub catalog: Arc<MockCatalog>,
    pub fetcher: Arc<MockFetcher>,
    pub transformer: Arc<MockTransformer>,
    pub manifest: Arc<SqliteManifestStore>,
    pub queue: Arc<SqliteTaskQueue>,
    pub runner: Arc<PipelineRunner>,
    pub config: Config,
    /// Temporary directory for the database and artifacts
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
    pub text: String,
}

/// Options for building a fixture.
#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Wire the mock catalog into the runner.
    pub with_catalog: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self { with_catalog: true }
    }
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config = fixtures::test_config(temp_dir.path());

        let manifest = Arc::new(
            SqliteManifestStore::new(&config.database.path)
                .expect("Failed to create manifest store"),
        );
        let queue = Arc::new(
            SqliteTaskQueue::new(&config.database.path, config.queue.visibility_timeout())
                .expect("Failed to create task queue"),
        );

        let catalog = Arc::new(MockCatalog::new());
        let fetcher = Arc::new(MockFetcher::new());
        let transformer = Arc::new(MockTransformer::new());
        transformer.set_default_quality(fixtures::good_quality()).await;

        let (recorder, writer) = create_recorder(
            Arc::clone(&manifest) as Arc<dyn MetricStore>,
            config.recorder.buffer_size,
        );
        tokio::spawn(writer.run());

        let runner = Arc::new(PipelineRunner::new(
            config.clone(),
            Arc::clone(&manifest) as Arc<dyn ManifestStore>,
            Arc::clone(&queue) as Arc<dyn TaskQueue>,
            recorder,
            test_config
                .with_catalog
                .then(|| Arc::clone(&catalog) as Arc<dyn CatalogClient>),
            fetcher.clone(),
            transformer.clone(),
        ));

        let state = Arc::new(AppState::new(
            config.clone(),
            Arc::clone(&manifest) as Arc<dyn ManifestStore>,
            Arc::clone(&manifest) as Arc<dyn MetricStore>,
            Arc::clone(&queue) as Arc<dyn TaskQueue>,
            Arc::clone(&runner),
        ));
        let router = orbitflow_server::api::create_router(state);

        Self {
            router,
            catalog,
            fetcher,
            transformer,
            manifest,
            queue,
            runner,
            config,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path).await
    }

    /// Send a POST request with an empty body.
    pub async fn post(&self, path: &str) -> TestResponse {
        self.request("POST", path).await
    }

    async fn request(&self, method: &str, path: &str) -> TestResponse {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .body(Body::empty())
            .unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let text = String::from_utf8_lossy(&body_bytes).into_owned();
        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body, text }
    }

    /// Poll `check` until it holds or `timeout` passes.
    pub async fn wait_until<F>(&self, timeout: std::time::Duration, mut check: F) -> bool
    where
        F: FnMut(&SqliteManifestStore) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if check(&self.manifest) {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        check(&self.manifest)
    }
}
