//! Prometheus metrics exposition
//!
//! The pool crate emits through the `metrics` facade; this module installs
//! the Prometheus recorder and registers descriptions so `/metrics` renders
//! HELP lines:
//!
//! - `client_pool_created_total` (counter): label `provider`
//! - `client_pool_reused_total` (counter): label `provider`
//! - `client_pool_removed_total` (counter): label `reason`
//! - `client_pool_close_failures_total` (counter): label `provider`
//! - `client_pool_entries` (gauge)

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_pool_metrics();
    Ok(handle)
}

/// Register HELP text for every pool metric.
pub fn describe_pool_metrics() {
    metrics::describe_counter!(
        "client_pool_created_total",
        "Provider clients built and registered in the pool"
    );
    metrics::describe_counter!(
        "client_pool_reused_total",
        "Acquisitions served by an already pooled client"
    );
    metrics::describe_counter!(
        "client_pool_removed_total",
        "Pooled clients removed and closed, by reason"
    );
    metrics::describe_counter!(
        "client_pool_close_failures_total",
        "Client close calls that failed (logged and ignored)"
    );
    metrics::describe_gauge!("client_pool_entries", "Live entries in the client pool");
}
