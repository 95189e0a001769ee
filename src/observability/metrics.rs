//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests reaching the middleware, by outcome
//! - `proxy_request_duration_seconds` (histogram): time to upstream response head
//! - `proxy_router_overrides_total` (counter): requests whose target the router replaced
//! - `proxy_upgrades_total` (counter): upgrade dispatches, by outcome
//! - `proxy_body_transform_failures_total` (counter): failed body interceptions
//!
//! Recording is a no-op until a recorder is installed, so library users and
//! tests pay nothing.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Outcome of a request seen by the middleware.
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Skipped,
    Proxied,
    Failed,
}

impl Outcome {
    fn as_str(&self) -> &'static str {
        match self {
            Outcome::Skipped => "skipped",
            Outcome::Proxied => "proxied",
            Outcome::Failed => "failed",
        }
    }
}

pub fn record_request(outcome: Outcome, start: Instant) {
    counter!("proxy_requests_total", "outcome" => outcome.as_str()).increment(1);
    if !matches!(outcome, Outcome::Skipped) {
        histogram!("proxy_request_duration_seconds").record(start.elapsed().as_secs_f64());
    }
}

pub fn record_router_override() {
    counter!("proxy_router_overrides_total").increment(1);
}

pub fn record_upgrade(outcome: Outcome) {
    counter!("proxy_upgrades_total", "outcome" => outcome.as_str()).increment(1);
}

pub fn record_transform_failure() {
    counter!("proxy_body_transform_failures_total").increment(1);
}
