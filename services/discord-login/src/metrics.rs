//! Prometheus metrics exposition
//!
//! Counters recorded by the service:
//!
//! - `discord_authorizations_total` (counter): authorization redirects issued
//! - `discord_callbacks_total` (counter): label `outcome`
//!
//! The library records `discord_user_cache_total` and
//! `discord_http_requests_total` through the same global recorder.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

pub fn record_authorization() {
    metrics::counter!("discord_authorizations_total").increment(1);
}

/// `outcome` is one of `complete`, `failed` (provider error) or `error`.
pub fn record_callback(outcome: &'static str) {
    metrics::counter!("discord_callbacks_total", "outcome" => outcome).increment(1);
}
