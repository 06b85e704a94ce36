//! Prometheus metrics for the gateway services.
//!
//! All metrics follow the naming convention: `jc_<component>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // EVENT HUB
    // =========================================================================

    /// Events accepted onto the dispatch queue, by event type
    pub static ref HUB_EVENTS_PUBLISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("jc_hub_events_published_total", "Events accepted for fan-out"),
        &["event_type"]
    ).expect("metric creation failed");

    /// Events dropped, by reason (dispatch_queue_full, hub_closed, mailbox_full, mailbox_closed)
    pub static ref HUB_EVENTS_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("jc_hub_events_dropped_total", "Events dropped by backpressure policy"),
        &["reason"]
    ).expect("metric creation failed");

    /// Per-client deliveries into mailboxes
    pub static ref HUB_DELIVERIES: IntCounter = IntCounter::new(
        "jc_hub_deliveries_total",
        "Events enqueued into client mailboxes"
    ).expect("metric creation failed");

    /// Currently registered clients
    pub static ref HUB_CLIENTS: IntGauge = IntGauge::new(
        "jc_hub_clients",
        "Clients currently registered with the hub"
    ).expect("metric creation failed");

    // =========================================================================
    // WEBSOCKET
    // =========================================================================

    /// WebSocket connections accepted
    pub static ref WS_CONNECTIONS: IntCounter = IntCounter::new(
        "jc_ws_connections_total",
        "WebSocket connections upgraded"
    ).expect("metric creation failed");

    // =========================================================================
    // AUTH
    // =========================================================================

    /// Rejected requests by reason
    pub static ref AUTH_REJECTIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("jc_auth_rejections_total", "Requests rejected by the auth chain"),
        &["reason"]
    ).expect("metric creation failed");

    /// Requests throttled by the per-key token bucket
    pub static ref RATE_LIMITED: IntCounter = IntCounter::new(
        "jc_auth_rate_limited_total",
        "Requests rejected with 429"
    ).expect("metric creation failed");

    // =========================================================================
    // BRIDGE
    // =========================================================================

    /// Backend calls by endpoint and outcome (ok, error)
    pub static ref BRIDGE_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("jc_bridge_requests_total", "Calls forwarded to the Python backend"),
        &["endpoint", "outcome"]
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; collectors already registered are skipped.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(HUB_EVENTS_PUBLISHED.clone()),
        Box::new(HUB_EVENTS_DROPPED.clone()),
        Box::new(HUB_DELIVERIES.clone()),
        Box::new(HUB_CLIENTS.clone()),
        Box::new(WS_CONNECTIONS.clone()),
        Box::new(AUTH_REJECTIONS.clone()),
        Box::new(RATE_LIMITED.clone()),
        Box::new(BRIDGE_REQUESTS.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
