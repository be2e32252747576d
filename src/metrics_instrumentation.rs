//! Operational counters and gauges exposed through the `metrics` facade.
//!
//! Call [`install_recorder`] once from the binary entry point to expose
//! these on a Prometheus scrape endpoint; library code only ever emits
//! through the macros and never depends on a concrete exporter.

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder on `addr` (e.g. `"0.0.0.0:9184"`).
pub fn install_recorder(addr: std::net::SocketAddr) -> crate::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| crate::BridgeError::ConfigInvalid(format!("metrics exporter: {e}")))
}

pub fn record_chunk_received(metric: &str) {
    metrics::counter!("metricq_sink_nsca_chunks_received_total", "metric" => metric.to_string())
        .increment(1);
}

pub fn record_report_emitted(check: &str, state: &str) {
    metrics::counter!(
        "metricq_sink_nsca_reports_emitted_total",
        "check" => check.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

pub fn record_batch_sent(size: usize) {
    metrics::histogram!("metricq_sink_nsca_batch_size").record(size as f64);
}

pub fn record_transmission_failure() {
    metrics::counter!("metricq_sink_nsca_transmission_failures_total").increment(1);
}

pub fn set_active_checks(count: usize) {
    metrics::gauge!("metricq_sink_nsca_active_checks").set(count as f64);
}
