//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    CHANNELS_ACTIVE, CONNECTIONS_TOTAL, DISPATCH_OUTCOMES_TOTAL, MESSAGES_DELIVERED_TOTAL,
    MESSAGES_FAILED_TOTAL, TRANSPORT_CHUNKS_TOTAL, TRANSPORT_FAILURES_TOTAL, TRANSPORT_LATENCY,
    WS_CONNECTIONS_CLOSED, WS_CONNECTIONS_OPENED, WS_CONNECTION_DURATION,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording dispatch pipeline outcomes
pub struct DispatchMetrics;

impl DispatchMetrics {
    pub fn record_outcome(outcome: &str) {
        DISPATCH_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
    }
}

/// Helper struct for recording transport metrics
pub struct TransportMetrics;

impl TransportMetrics {
    pub fn record_latency(transport: &str, elapsed: Duration) {
        TRANSPORT_LATENCY
            .with_label_values(&[transport])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_failure(transport: &str) {
        TRANSPORT_FAILURES_TOTAL.with_label_values(&[transport]).inc();
    }

    pub fn record_chunks(count: u64) {
        TRANSPORT_CHUNKS_TOTAL.inc_by(count);
    }
}

/// Helper struct for recording local delivery metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    /// Record successful deliveries
    pub fn record_delivered(count: u64) {
        MESSAGES_DELIVERED_TOTAL.inc_by(count);
    }

    /// Record failed deliveries
    pub fn record_failed(count: u64) {
        MESSAGES_FAILED_TOTAL.inc_by(count);
    }
}

/// Helper struct for WebSocket connection metrics
pub struct WsMetrics;

impl WsMetrics {
    pub fn record_opened() {
        WS_CONNECTIONS_OPENED.inc();
    }

    pub fn record_closed(duration: Duration) {
        WS_CONNECTIONS_CLOSED.inc();
        WS_CONNECTION_DURATION.observe(duration.as_secs_f64());
    }

    /// Refresh gauges from connection manager statistics
    pub fn set_connection_gauges(connections: usize, channels: usize) {
        CONNECTIONS_TOTAL.set(connections as i64);
        CHANNELS_ACTIVE.set(channels as i64);
    }
}
