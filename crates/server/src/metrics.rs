//! Prometheus metrics: a process-wide recorder plus thin `record_*` helpers
//! so handlers never touch the `metrics` macros directly.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

pub fn record_request(route: &str, status: u16) {
    metrics::counter!("ragq_requests_total", "route" => route.to_string(), "status" => status.to_string())
        .increment(1);
}

pub fn record_query_latency_ms(stage: &str, millis: u64) {
    metrics::histogram!("ragq_query_latency_ms", "stage" => stage.to_string()).record(millis as f64);
}

pub fn record_error(kind: &str) {
    metrics::counter!("ragq_errors_total", "kind" => kind.to_string()).increment(1);
}
