//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Identifier harvests (outcomes, pages, discovered records)
//! - Object downloads (outcomes, durations)
//! - Scheduler daemons and error flow

use once_cell::sync::Lazy;
use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts,
};

// =============================================================================
// Identifier Harvest Metrics
// =============================================================================

/// Identifier harvests total by result.
pub static HARVESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvester_harvests_total", "Total identifier harvests"),
        &["result"], // "completed", "interrupted", "failed"
    )
    .unwrap()
});

/// ListIdentifiers pages parsed.
pub static HARVEST_PAGES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "harvester_harvest_pages_total",
        "Total ListIdentifiers pages parsed",
    )
    .unwrap()
});

/// Record changes caused by identifier harvests.
pub static RECORDS_DISCOVERED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "harvester_records_discovered_total",
            "Records inserted or withdrawn by identifier harvests",
        ),
        &["action"], // "inserted", "withdrawn"
    )
    .unwrap()
});

// =============================================================================
// Object Download Metrics
// =============================================================================

/// Object downloads total by result.
pub static DOWNLOADS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvester_downloads_total", "Total object downloads"),
        &["result"], // "archived", "rejected", "failed"
    )
    .unwrap()
});

/// Object download duration in seconds.
pub static DOWNLOAD_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "harvester_download_duration_seconds",
            "Duration of one object download, transform included",
        )
        .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["result"],
    )
    .unwrap()
});

// =============================================================================
// Scheduler and Error Flow Metrics
// =============================================================================

/// Workers currently running per daemon.
pub static WORKERS_ACTIVE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("harvester_workers_active", "Workers currently running"),
        &["daemon"],
    )
    .unwrap()
});

/// Repositories paused after crossing their failure threshold.
pub static REPOSITORY_PAUSES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "harvester_repository_pauses_total",
            "Repositories paused on error",
        ),
        &["worker"], // "identifier", "object"
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Identifier harvests
        Box::new(HARVESTS_TOTAL.clone()),
        Box::new(HARVEST_PAGES.clone()),
        Box::new(RECORDS_DISCOVERED.clone()),
        // Downloads
        Box::new(DOWNLOADS_TOTAL.clone()),
        Box::new(DOWNLOAD_DURATION.clone()),
        // Scheduler
        Box::new(WORKERS_ACTIVE.clone()),
        Box::new(REPOSITORY_PAUSES.clone()),
    ]
}
