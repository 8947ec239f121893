//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the harvester server:
//! - HTTP request metrics (latency, counts)
//! - WebSocket connection metrics
//! - Repository and record state gauges (collected dynamically)
//! - Daemon queue depths (collected dynamically)

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};

use harvester_core::{HarvestState, ProcessStatus, RepositoryFilter};

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
            "harvester_http_request_duration_seconds",
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
        Opts::new("harvester_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "harvester_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// WebSocket Metrics
// =============================================================================

/// Active WebSocket connections.
pub static WS_CONNECTIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "harvester_ws_connections_active",
        "Number of active WebSocket connections",
    )
    .unwrap()
});

/// Total WebSocket connections (cumulative).
pub static WS_CONNECTIONS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "harvester_ws_connections_total",
        "Total WebSocket connections since startup",
    )
    .unwrap()
});

/// WebSocket messages sent by type.
pub static WS_MESSAGES_SENT: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("harvester_ws_messages_sent_total", "WebSocket messages sent"),
        &["type"],
    )
    .unwrap()
});

/// WebSocket lag events (when client falls behind).
pub static WS_LAG_EVENTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "harvester_ws_lag_events_total",
        "WebSocket lag events (client fell behind)",
    )
    .unwrap()
});

// =============================================================================
// State Gauges (collected dynamically)
// =============================================================================

/// Records by processing status.
pub static RECORDS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("harvester_records_by_status", "Current record count by status"),
        &["status"],
    )
    .unwrap()
});

/// Repositories by harvest state.
pub static REPOSITORIES_BY_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "harvester_repositories_by_state",
            "Current repository count by harvest state",
        ),
        &["state"],
    )
    .unwrap()
});

/// Work waiting to be claimed per daemon.
pub static DAEMON_QUEUE_DEPTH: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("harvester_daemon_queue_depth", "Work waiting per daemon"),
        &["daemon"],
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

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

    // WebSocket
    registry
        .register(Box::new(WS_CONNECTIONS_ACTIVE.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_CONNECTIONS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(WS_MESSAGES_SENT.clone()))
        .unwrap();
    registry.register(Box::new(WS_LAG_EVENTS.clone())).unwrap();

    // State
    registry
        .register(Box::new(RECORDS_BY_STATUS.clone()))
        .unwrap();
    registry
        .register(Box::new(REPOSITORIES_BY_STATE.clone()))
        .unwrap();
    registry
        .register(Box::new(DAEMON_QUEUE_DEPTH.clone()))
        .unwrap();

    // Core metrics (harvests, downloads, scheduler, error flow)
    for metric in harvester_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so gauges reflect the stores and daemons.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    if let Ok(counts) = state.records().status_counts(None) {
        for status in ProcessStatus::ALL {
            RECORDS_BY_STATUS
                .with_label_values(&[status.as_str()])
                .set(counts.get(status));
        }
    }

    for harvest_state in [
        HarvestState::Idle,
        HarvestState::Harvesting,
        HarvestState::PausedOnError,
    ] {
        let filter = RepositoryFilter::new().with_state(harvest_state);
        if let Ok(count) = state.repositories().count(&filter) {
            REPOSITORIES_BY_STATE
                .with_label_values(&[harvest_state.as_str()])
                .set(count);
        }
    }

    let identifier = state.identifier_daemon().run_state().await;
    let object = state.object_daemon().run_state().await;
    for run_state in [identifier, object] {
        DAEMON_QUEUE_DEPTH
            .with_label_values(&[run_state.daemon.as_str()])
            .set(run_state.queue_depth as i64);
    }
}

/// Normalize a path for metric labels (replace record ids with placeholders).
///
/// Repository ids are operator-chosen and few, so they stay as they are.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
