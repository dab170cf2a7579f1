//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by route, status
//! - `gateway_request_duration_seconds` (histogram): latency by route
//! - `gateway_circuit_transitions_total` (counter): breaker transitions by route, state
//! - `gateway_rate_limited_total` (counter): rejected requests by route
//! - `gateway_cache_lookups_total` (counter): lookups by route, result
//!   (`hit`, `miss`, `coalesced`, `store_failed`)
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until a
//!   recorder is installed
//! - The Prometheus exporter is optional and serves its own listener

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::Instant;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(route: &str, status: u16, started: Instant) {
    metrics::counter!(
        "gateway_requests_total",
        "route" => route.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(started.elapsed().as_secs_f64());
}

pub fn record_circuit_transition(route: &str, state: &'static str) {
    metrics::counter!(
        "gateway_circuit_transitions_total",
        "route" => route.to_string(),
        "state" => state
    )
    .increment(1);
}

pub fn record_rate_limited(route: &str) {
    metrics::counter!("gateway_rate_limited_total", "route" => route.to_string()).increment(1);
}

pub fn record_cache_lookup(route: &str, result: &'static str) {
    metrics::counter!(
        "gateway_cache_lookups_total",
        "route" => route.to_string(),
        "result" => result
    )
    .increment(1);
}
