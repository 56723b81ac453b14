//! Metrics collection and export for Parley.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format. Hub-side counters are recorded by `parley-core`;
//! this module describes them and adds connection-level metrics.

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use parley_core::metrics::names as hub;
use std::net::SocketAddr;
use tracing::info;

/// Metric names owned by the server.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "parley_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "parley_connections_active";
    pub const ERRORS_TOTAL: &str = "parley_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    metrics::describe_counter!(hub::ENVELOPES_INBOUND, "Decoded inbound envelopes by command");
    metrics::describe_counter!(hub::ENVELOPES_DROPPED, "Inbound frames dropped by reason");
    metrics::describe_counter!(hub::ENVELOPES_ROUTED, "Envelopes routed by scope");
    metrics::describe_counter!(hub::DELIVERIES_TOTAL, "Envelopes enqueued to connections");
    metrics::describe_counter!(hub::CONNECTIONS_PURGED, "Connections purged by the hub by reason");
    metrics::describe_counter!(hub::CONVERSATIONS_CREATED, "Conversations created");
    metrics::describe_gauge!(hub::CONVERSATIONS_ACTIVE, "Conversations with at least one member");
    metrics::describe_gauge!(hub::IDENTITIES_ONLINE, "Distinct identities with a live connection");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}
