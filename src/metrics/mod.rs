//! Prometheus metrics for the dispatch service.
//!
//! - Dispatch metrics (pipeline outcomes)
//! - Transport metrics (latency, failures, chunking)
//! - Delivery metrics (local subscriber fan-out)
//! - WebSocket connection metrics

mod helpers;

pub use helpers::{encode_metrics, DeliveryMetrics, DispatchMetrics, TransportMetrics, WsMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "ara";

lazy_static! {
    // ============================================================================
    // Dispatch Metrics
    // ============================================================================

    /// Dispatch pipeline outcomes (dispatched, guard_rejected, channel_missing, ...)
    pub static ref DISPATCH_OUTCOMES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatch_outcomes_total", METRIC_PREFIX),
        "Dispatch pipeline outcomes for opted-in handlers",
        &["outcome"]
    ).unwrap();

    // ============================================================================
    // Transport Metrics
    // ============================================================================

    /// Transport trigger latency by transport
    pub static ref TRANSPORT_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_transport_latency_seconds", METRIC_PREFIX),
        "Transport trigger latency in seconds",
        &["transport"],
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    /// Transport failures by transport
    pub static ref TRANSPORT_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_transport_failures_total", METRIC_PREFIX),
        "Total transport trigger failures",
        &["transport"]
    ).unwrap();

    /// Chunk pieces sent for oversized payloads
    pub static ref TRANSPORT_CHUNKS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_transport_chunks_total", METRIC_PREFIX),
        "Total chunk pieces sent for oversized payloads"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Total messages delivered to local connections
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages successfully delivered to local connections"
    ).unwrap();

    /// Total local delivery failures
    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total message delivery failures to local connections"
    ).unwrap();

    // ============================================================================
    // WebSocket Metrics
    // ============================================================================

    /// Total number of active WebSocket connections
    pub static ref CONNECTIONS_TOTAL: IntGauge = register_int_gauge!(
        format!("{}_connections_total", METRIC_PREFIX),
        "Total number of active WebSocket connections"
    ).unwrap();

    /// Total channels with subscribers
    pub static ref CHANNELS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_channels_active", METRIC_PREFIX),
        "Total number of channels with at least one subscriber"
    ).unwrap();

    pub static ref WS_CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections opened"
    ).unwrap();

    pub static ref WS_CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_ws_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed"
    ).unwrap();

    /// WebSocket connection duration
    pub static ref WS_CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_ws_connection_duration_seconds", METRIC_PREFIX),
        "WebSocket connection duration in seconds",
        vec![1.0, 10.0, 60.0, 300.0, 1800.0, 3600.0, 14400.0]
    ).unwrap();
}
