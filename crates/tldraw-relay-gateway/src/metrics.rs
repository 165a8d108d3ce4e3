//! Prometheus metrics recording and endpoint.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::warn;

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Install the Prometheus recorder on first use and return the render handle.
/// `None` when another recorder already owns the process.
pub fn prometheus_handle() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to install Prometheus recorder");
                None
            }
        })
        .clone()
}

/// Record a new event-stream connection.
pub fn record_stream_connect() {
    metrics::gauge!("stream_connections_active").increment(1.0);
}

/// Record an event-stream disconnection.
pub fn record_stream_disconnect() {
    metrics::gauge!("stream_connections_active").decrement(1.0);
}

pub fn record_operation(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("operations_published_total", &labels).increment(1);
}

/// Record a snapshot post; `outcome` is "accepted", "rejected" or "forward_failed".
pub fn record_snapshot_request(outcome: &'static str) {
    let labels = [("outcome", outcome.to_string())];
    metrics::counter!("snapshot_requests_total", &labels).increment(1);
}

pub fn record_relay_frame_dropped() {
    metrics::counter!("relay_frames_dropped_total").increment(1);
}
