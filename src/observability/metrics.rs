//! Metrics collection and exposition.
//!
//! # Metrics
//! - `eventnet_connections_total` (counter): established connections by side (server, client)
//! - `eventnet_connections_rejected_total` (counter): accepts dropped by the protocol filter
//! - `eventnet_active_connections` (gauge): connections currently registered
//! - `eventnet_events_total` (counter): queued events by kind
//! - `eventnet_bytes_read_total` / `eventnet_bytes_written_total` (counters)
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::net::EventKind;

/// Install the Prometheus recorder and serve it over HTTP on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a connection entering a registry.
pub fn record_connection_opened(side: &'static str) {
    ::metrics::counter!("eventnet_connections_total", "side" => side).increment(1);
    ::metrics::gauge!("eventnet_active_connections").increment(1.0);
}

/// Record a connection leaving its registry.
pub fn record_connection_closed() {
    ::metrics::gauge!("eventnet_active_connections").decrement(1.0);
}

pub fn record_connection_rejected() {
    ::metrics::counter!("eventnet_connections_rejected_total").increment(1);
}

pub fn record_event(kind: EventKind) {
    ::metrics::counter!("eventnet_events_total", "kind" => kind.as_str()).increment(1);
}

pub fn record_bytes_read(n: usize) {
    ::metrics::counter!("eventnet_bytes_read_total").increment(n as u64);
}

pub fn record_bytes_written(n: usize) {
    ::metrics::counter!("eventnet_bytes_written_total").increment(n as u64);
}
