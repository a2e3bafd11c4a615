//! Metrics collection and exposition.
//!
//! # Metrics
//! - `capture_traces_created_total` (counter): traces allocated
//! - `capture_traces_stored_total` (counter): traces committed
//! - `capture_traces_dropped_total` (counter): traces lost, by reason
//! - `capture_malformed_records_total` (counter): stored values that failed to decode
//! - `capture_store_slow_writes_total` (counter): writes that outlived the write timeout
//! - `capture_store_write_duration_seconds` (histogram): encode + commit latency

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_trace_created() {
    counter!("capture_traces_created_total").increment(1);
}

pub fn record_trace_stored(elapsed: Duration) {
    counter!("capture_traces_stored_total").increment(1);
    histogram!("capture_store_write_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_trace_dropped(reason: &'static str) {
    counter!("capture_traces_dropped_total", "reason" => reason).increment(1);
}

pub fn record_malformed_record() {
    counter!("capture_malformed_records_total").increment(1);
}

pub fn record_slow_write() {
    counter!("capture_store_slow_writes_total").increment(1);
}
