//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the orbitflow server:
//! - HTTP request metrics (latency, counts)
//! - Pipeline state (collected dynamically on scrape)
//! - Everything registered by `orbitflow_core::metrics`

use axum::extract::MatchedPath;
use axum::http::Request;
use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tracing::warn;

use orbitflow_core::{FileStatus, QueueName};

use crate::state::AppState;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "orbitflow_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orbitflow_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "orbitflow_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Pipeline State
// =============================================================================

/// Whether the pipeline background tasks are running.
pub static PIPELINE_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "orbitflow_pipeline_running",
        "Whether the pipeline is running (1) or stopped (0)",
    )
    .unwrap()
});

/// Files acquired in the last 24 hours, by current status.
pub static FILES_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "orbitflow_files_by_status",
            "Files acquired in the last 24 hours by current status",
        ),
        &["status"],
    )
    .unwrap()
});

/// Queue depth by queue and delivery state.
pub static QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("orbitflow_queue_depth", "Queue items by state"),
        &["queue", "state"], // state: "ready", "delayed", "in_flight"
    )
    .unwrap()
});

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Pipeline state
    registry.register(Box::new(PIPELINE_RUNNING.clone())).unwrap();
    registry.register(Box::new(FILES_BY_STATUS.clone())).unwrap();
    registry.register(Box::new(QUEUE_DEPTH.clone())).unwrap();

    // Core
    for metric in orbitflow_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the store and queues at
/// scrape time.
pub fn collect_dynamic_metrics(state: &AppState) {
    PIPELINE_RUNNING.set(i64::from(state.runner().is_running()));

    // Reset first so statuses that dropped to zero do not keep stale values.
    for status in FileStatus::ALL {
        FILES_BY_STATUS.with_label_values(&[status.as_str()]).set(0);
    }
    match state.manifest().status_summary() {
        Ok(summary) => {
            for row in summary {
                FILES_BY_STATUS
                    .with_label_values(&[row.status.as_str()])
                    .set(row.count);
            }
        }
        Err(e) => warn!("Failed to collect status summary: {}", e),
    }

    for queue in [QueueName::Download, QueueName::Processing] {
        match state.queue().depth(queue) {
            Ok(depth) => {
                let name = queue.as_str();
                QUEUE_DEPTH
                    .with_label_values(&[name, "ready"])
                    .set(depth.ready as i64);
                QUEUE_DEPTH
                    .with_label_values(&[name, "delayed"])
                    .set(depth.delayed as i64);
                QUEUE_DEPTH
                    .with_label_values(&[name, "in_flight"])
                    .set(depth.in_flight as i64);
            }
            Err(e) => warn!("Failed to collect {} queue depth: {}", queue, e),
        }
    }
}

/// Label for a request path: the matched route template when there is one,
/// so `/files/{file_id}` does not create one series per file.
pub fn route_label<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_registry_includes_core_metrics() {
        orbitflow_core::metrics::FILES_DISCOVERED.inc();
        HTTP_REQUESTS_IN_FLIGHT.set(0);

        let text = encode_metrics();
        assert!(text.contains("orbitflow_files_discovered_total"));
        assert!(text.contains("orbitflow_http_requests_in_flight"));
    }

    #[test]
    fn test_route_label_without_match() {
        let request = Request::builder()
            .uri("/api/v1/files/MSG4-1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(route_label(&request), "unmatched");
    }
}
