//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Discovery (poll cycles, files discovered)
//! - Stages (attempts, durations, retries, permanent failures, duplicates)
//! - Quality gate rejections
//! - Reaper and metrics recorder health

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Discovery
// =============================================================================

/// Poll cycles by result.
pub static POLL_CYCLES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orbitflow_poll_cycles_total", "Total catalog poll cycles"),
        &["result"], // "success", "failed"
    )
    .unwrap()
});

/// Catalog query duration in seconds.
pub static POLL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "orbitflow_poll_duration_seconds",
            "Duration of one catalog poll cycle",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["result"],
    )
    .unwrap()
});

/// Files first seen by the poller.
pub static FILES_DISCOVERED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "orbitflow_files_discovered_total",
        "Files newly added to the manifest",
    )
    .unwrap()
});

// =============================================================================
// Stages
// =============================================================================

/// Stage attempts by stage and result.
pub static STAGE_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orbitflow_stage_attempts_total", "Total stage attempts"),
        &["stage", "result"], // result: "success", "failed", "skipped"
    )
    .unwrap()
});

/// Stage attempt duration in seconds.
pub static STAGE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "orbitflow_stage_duration_seconds",
            "Duration of one stage attempt",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["stage"],
    )
    .unwrap()
});

/// Retries scheduled by stage.
pub static RETRIES_SCHEDULED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orbitflow_retries_scheduled_total", "Retries scheduled"),
        &["stage"],
    )
    .unwrap()
});

/// Files given up on, by stage.
pub static PERMANENT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "orbitflow_permanent_failures_total",
            "Files moved to FAILED",
        ),
        &["stage"],
    )
    .unwrap()
});

/// Deliveries that lost the conditional transition.
pub static DUPLICATE_DELIVERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "orbitflow_duplicate_deliveries_total",
            "Queue deliveries dropped because the file had already moved on",
        ),
        &["stage"],
    )
    .unwrap()
});

/// Quality rejections by reason code.
pub static QUALITY_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "orbitflow_quality_rejections_total",
            "Processed files skipped by the quality gate",
        ),
        &["reason"],
    )
    .unwrap()
});

// =============================================================================
// Housekeeping
// =============================================================================

/// Reaper actions by kind.
pub static REAPER_ACTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("orbitflow_reaper_actions_total", "Records reclaimed or requeued"),
        &["action"], // "reclaimed", "requeued"
    )
    .unwrap()
});

/// Stage metrics that could not be recorded.
pub static RECORDER_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "orbitflow_recorder_failures_total",
            "Stage metrics dropped by the recorder",
        ),
        &["reason"], // "channel_full", "channel_closed", "store"
    )
    .unwrap()
});

/// Get all core metrics for registration with a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Discovery
        Box::new(POLL_CYCLES.clone()),
        Box::new(POLL_DURATION.clone()),
        Box::new(FILES_DISCOVERED.clone()),
        // Stages
        Box::new(STAGE_ATTEMPTS.clone()),
        Box::new(STAGE_DURATION.clone()),
        Box::new(RETRIES_SCHEDULED.clone()),
        Box::new(PERMANENT_FAILURES.clone()),
        Box::new(DUPLICATE_DELIVERIES.clone()),
        Box::new(QUALITY_REJECTIONS.clone()),
        // Housekeeping
        Box::new(REAPER_ACTIONS.clone()),
        Box::new(RECORDER_FAILURES.clone()),
    ]
}
