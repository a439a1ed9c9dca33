use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use orbitflow_core::{
    create_recorder, load_config, validate_config, CatalogClient, CommandTransformer, Fetcher,
    HttpCatalogClient, HttpFetcher, ManifestStore, MetricStore, PipelineRunner,
    SqliteManifestStore, SqliteTaskQueue, TaskQueue, Transformer,
};
use orbitflow_server::api::create_router;
use orbitflow_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long to wait for the recorder to flush buffered metrics on shutdown.
const RECORDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    let json_logs = std::env::var("ORBITFLOW_LOG_FORMAT").is_ok_and(|v| v == "json");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // Determine config path
    let config_path = std::env::var("ORBITFLOW_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("orbitflow {} loading configuration from {:?}", VERSION, config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!("Configuration loaded (fingerprint {})", &config_hash[..16]);
    info!("Database path: {:?}", config.database.path);

    // The manifest, metrics and queues share one SQLite file.
    let store = Arc::new(
        SqliteManifestStore::new(&config.database.path)
            .context("Failed to open manifest store")?,
    );
    let manifest: Arc<dyn ManifestStore> = store.clone();
    let metric_store: Arc<dyn MetricStore> = store;
    info!("Manifest store initialized");

    let queue: Arc<dyn TaskQueue> = Arc::new(
        SqliteTaskQueue::new(&config.database.path, config.queue.visibility_timeout())
            .context("Failed to open task queues")?,
    );
    info!("Task queues initialized");

    // Stage metrics are written off the worker path.
    let (recorder, recorder_writer) =
        create_recorder(Arc::clone(&metric_store), config.recorder.buffer_size);
    let writer_handle = tokio::spawn(recorder_writer.run());

    let catalog: Option<Arc<dyn CatalogClient>> = match &config.catalog {
        Some(catalog_config) => {
            info!(
                "Using catalog at {} (collection '{}')",
                catalog_config.url, catalog_config.collection
            );
            Some(Arc::new(
                HttpCatalogClient::new(catalog_config)
                    .context("Failed to create catalog client")?,
            ))
        }
        None => {
            info!("No catalog configured; discovery only via existing manifest");
            None
        }
    };

    let fetcher: Arc<dyn Fetcher> = Arc::new(
        HttpFetcher::new(&config.download).context("Failed to create HTTP fetcher")?,
    );
    let transformer: Arc<dyn Transformer> = Arc::new(CommandTransformer::new(
        &config.processing.transform,
        config.processing.timeout(),
    ));
    info!("Transform tool: {}", config.processing.transform.program);

    let runner = Arc::new(PipelineRunner::new(
        config.clone(),
        Arc::clone(&manifest),
        Arc::clone(&queue),
        recorder,
        catalog,
        fetcher,
        transformer,
    ));
    runner.start().await;

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        manifest,
        metric_store,
        queue,
        Arc::clone(&runner),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error");

    info!("Server shutting down...");
    runner.stop().await;

    // The runner owns the last RecorderHandle; dropping it closes the
    // channel so the writer drains and exits.
    drop(runner);
    match tokio::time::timeout(RECORDER_DRAIN_TIMEOUT, writer_handle).await {
        Ok(Ok(())) => info!("Metrics recorder drained"),
        Ok(Err(e)) => error!("Metrics recorder task failed: {}", e),
        Err(_) => warn!(
            "Metrics recorder did not drain within {:?}",
            RECORDER_DRAIN_TIMEOUT
        ),
    }

    served
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
