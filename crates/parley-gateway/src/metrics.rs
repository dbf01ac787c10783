//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

pub fn record_session_open() {
    metrics::gauge!("sessions_active").increment(1.0);
}

pub fn record_session_close() {
    metrics::gauge!("sessions_active").decrement(1.0);
}

pub fn record_turn_started() {
    metrics::counter!("turns_started_total").increment(1);
}

/// A new turn pre-empted a running one.
pub fn record_barge_in() {
    metrics::counter!("barge_ins_total").increment(1);
}

pub fn record_duplicate_turn() {
    metrics::counter!("duplicate_turns_total").increment(1);
}

/// Record a failed turn by the stage that failed.
pub fn record_pipeline_failure(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("pipeline_failures_total", &labels).increment(1);
}

pub fn record_tool_calls(count: u32) {
    metrics::counter!("tool_calls_total").increment(u64::from(count));
}
