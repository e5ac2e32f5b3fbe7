//! Metrics collection and exposition.
//!
//! # Metrics
//! - `soap_proxy_exchanges_total` (counter): exchanges by outcome
//! - `soap_proxy_exchange_duration_seconds` (histogram): upstream latency
//! - `soap_proxy_body_truncations_total` (counter): captures cut at the cap
//! - `soap_proxy_hook_dispatches_total` (counter): hook calls by outcome
//! - `soap_proxy_journal_failures_total` (counter): failed journal writes
//! - `soap_proxy_trace_window_size` (gauge): entries held in memory
//!
//! Without an installed recorder every call is a no-op, so tests need no
//! setup.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record a finished exchange. `outcome` is "success" or "transport_error".
pub fn record_exchange(outcome: &'static str, elapsed: Duration) {
    counter!("soap_proxy_exchanges_total", "outcome" => outcome).increment(1);
    histogram!("soap_proxy_exchange_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record a body cut at the capture cap. `direction` is "request" or "response".
pub fn record_truncation(direction: &'static str) {
    counter!("soap_proxy_body_truncations_total", "direction" => direction).increment(1);
}

/// Record the outcome of one hook dispatch.
pub fn record_hook_dispatch(outcome: &'static str) {
    counter!("soap_proxy_hook_dispatches_total", "outcome" => outcome).increment(1);
}

pub fn record_journal_failure() {
    counter!("soap_proxy_journal_failures_total").increment(1);
}

pub fn record_window_size(len: usize) {
    gauge!("soap_proxy_trace_window_size").set(len as f64);
}
