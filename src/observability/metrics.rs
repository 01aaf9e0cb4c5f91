//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ldap_factory_online` (gauge): 1 = online, 0 = offline, by balancer and factory index
//! - `ldap_acquisition_failures_total` (counter): failed acquisitions through a balancer
//! - `ldap_heartbeats_sent_total` (counter)
//! - `ldap_heartbeat_timeouts_total` (counter)
//! - `ldap_connections_invalidated_total` (counter)

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Prometheus metrics endpoint started");
    Ok(())
}

pub fn record_factory_state(balancer: &str, index: usize, online: bool) {
    metrics::gauge!(
        "ldap_factory_online",
        "balancer" => balancer.to_string(),
        "factory" => index.to_string()
    )
    .set(if online { 1.0 } else { 0.0 });
}

pub fn record_acquisition_failure(balancer: &str) {
    metrics::counter!("ldap_acquisition_failures_total", "balancer" => balancer.to_string()).increment(1);
}

pub fn record_heartbeat_sent() {
    metrics::counter!("ldap_heartbeats_sent_total").increment(1);
}

pub fn record_heartbeat_timeout() {
    metrics::counter!("ldap_heartbeat_timeouts_total").increment(1);
}

pub fn record_connection_invalidated() {
    metrics::counter!("ldap_connections_invalidated_total").increment(1);
}
