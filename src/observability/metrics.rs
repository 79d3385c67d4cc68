//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): relayed requests by method, status
//! - `proxy_request_duration_seconds` (histogram): relay latency
//! - `proxy_tunnels_total` (counter): CONNECT outcomes
//! - `proxy_tunnel_bytes_total` (counter): bytes spliced per direction
//! - `proxy_active_tunnels` (gauge): open tunnel sessions
//! - `proxy_transcript_failures_total` (counter): persistence failures by stage
//! - `proxy_probe_alerts_total` (counter): XXE leak markers seen
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade and is a no-op until an
//!   exporter is installed

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus exporter with its own HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, start_time: Instant) {
    counter!(
        "proxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("proxy_request_duration_seconds", "method" => method.to_string())
        .record(start_time.elapsed().as_secs_f64());
}

/// `outcome` is one of `established`, `dial_failed`, `upgrade_failed`.
pub fn record_tunnel(outcome: &'static str) {
    counter!("proxy_tunnels_total", "outcome" => outcome).increment(1);
}

pub fn tunnel_opened() {
    gauge!("proxy_active_tunnels").increment(1.0);
}

pub fn tunnel_closed() {
    gauge!("proxy_active_tunnels").decrement(1.0);
}

pub fn record_tunnel_bytes(direction: &'static str, bytes: u64) {
    counter!("proxy_tunnel_bytes_total", "direction" => direction).increment(bytes);
}

/// `stage` is `request` or `response`.
pub fn record_transcript_failure(stage: &'static str) {
    counter!("proxy_transcript_failures_total", "stage" => stage).increment(1);
}

pub fn record_probe_alert() {
    counter!("proxy_probe_alerts_total").increment(1);
}
