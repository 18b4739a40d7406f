//! Prometheus metrics endpoint
//!
//! Exposes application metrics in Prometheus format for monitoring.

use axum::response::IntoResponse;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::Lazy;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: Lazy<PrometheusHandle> = Lazy::new(|| {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
});

/// Initialize metrics (call once at startup)
pub fn init_metrics() {
    let _ = &*PROMETHEUS_HANDLE;

    register_metrics();
}

fn register_metrics() {
    metrics::describe_counter!(
        "conduit_requests_total",
        "Total number of chat requests processed"
    );
    metrics::describe_histogram!(
        "conduit_request_duration_seconds",
        "Chat request duration in seconds"
    );
    metrics::describe_counter!("conduit_tokens_total", "Total tokens accounted");
}

/// Prometheus metrics endpoint handler
pub async fn prometheus_metrics() -> impl IntoResponse {
    PROMETHEUS_HANDLE.render()
}

/// Record a finished request
pub fn record_request(status: &str, provider: &str, model: &str, duration_secs: f64) {
    metrics::counter!(
        "conduit_requests_total",
        "status" => status.to_string(),
        "provider" => provider.to_string(),
        "model" => model.to_string()
    )
    .increment(1);
    metrics::histogram!("conduit_request_duration_seconds", "model" => model.to_string())
        .record(duration_secs);
}

/// Record accounted tokens
pub fn record_tokens(token_type: &str, count: u64, model: &str) {
    metrics::counter!(
        "conduit_tokens_total",
        "type" => token_type.to_string(),
        "model" => model.to_string()
    )
    .increment(count);
}
