//! Prometheus metrics
//!
//! Recorder installed once at startup; `/metrics` renders the registry.
//! Helpers keep metric names in one place.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Safe to call more than once; later
/// calls reuse the first handle.
pub fn init_metrics() -> Option<PrometheusHandle> {
    if let Some(handle) = HANDLE.get() {
        return Some(handle.clone());
    }
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            let _ = HANDLE.set(handle.clone());
            Some(handle)
        }
        Err(e) => {
            tracing::warn!(error = %e, "Failed to install metrics recorder");
            None
        }
    }
}

/// Render the current registry for the /metrics endpoint.
pub async fn metrics_handler() -> String {
    HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

pub fn record_connection_opened(role: &'static str) {
    metrics::counter!("classbridge_connections_opened_total", "role" => role).increment(1);
}

pub fn record_connection_closed() {
    metrics::counter!("classbridge_connections_closed_total").increment(1);
}

pub fn record_message(message_type: &str) {
    metrics::counter!("classbridge_messages_total", "type" => message_type.to_string())
        .increment(1);
}

pub fn record_malformed_message() {
    metrics::counter!("classbridge_malformed_messages_total").increment(1);
}

pub fn record_session_ended(quality: &'static str) {
    metrics::counter!("classbridge_sessions_ended_total", "quality" => quality).increment(1);
}

pub fn record_translation_latency(total_ms: u64) {
    metrics::histogram!("classbridge_translation_latency_ms").record(total_ms as f64);
}

pub fn record_delivery(delivered: u32, failed: u32) {
    metrics::counter!("classbridge_translations_delivered_total").increment(delivered as u64);
    if failed > 0 {
        metrics::counter!("classbridge_translations_failed_total").increment(failed as u64);
    }
}

pub fn record_dead_peer_terminated() {
    metrics::counter!("classbridge_dead_peers_terminated_total").increment(1);
}
