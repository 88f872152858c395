// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = &$value;
        $(let _ = &$label_value;)*
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = &$value;
        $(let _ = &$label_value;)*
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {{
        let _ = &$value;
        $(let _ = &$label_value;)*
    }};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

use std::time::Duration;

/// Registers descriptions for every metric the engine emits.
/// Call once at startup, before the first cycle.
pub fn describe_metrics() {
    describe_counter!(
        "airseeker_gateway_requests_total",
        Unit::Count,
        "Signed data gateway requests, labeled by result (ok, error, invalid_response)."
    );
    describe_histogram!(
        "airseeker_gateway_latency_ms",
        "Latency of successful signed data gateway requests in milliseconds."
    );
    describe_counter!(
        "airseeker_beacon_fetches_total",
        Unit::Count,
        "Beacon fetch outcomes per cycle, labeled by result (fetched, failed)."
    );
    describe_counter!(
        "airseeker_data_feed_skips_total",
        Unit::Count,
        "Data feeds left out of an update, labeled by kind and reason."
    );
    describe_counter!(
        "airseeker_batch_failures_total",
        Unit::Count,
        "Read or write batches dropped after exhausting retries, labeled by phase."
    );
    describe_gauge!(
        "airseeker_pending_writes",
        "Write instructions produced by the most recent cycle."
    );
}

pub fn increment_gateway_request(result: &'static str) {
    counter!("airseeker_gateway_requests_total", 1, "result" => result);
}

pub fn record_gateway_latency(duration: Duration) {
    histogram!("airseeker_gateway_latency_ms", duration.as_millis() as f64);
}

pub fn increment_beacon_fetch(result: &'static str) {
    counter!("airseeker_beacon_fetches_total", 1, "result" => result);
}

pub fn increment_data_feed_skip(kind: &'static str, reason: &'static str) {
    counter!("airseeker_data_feed_skips_total", 1, "kind" => kind, "reason" => reason);
}

pub fn increment_batch_failure(phase: &'static str) {
    counter!("airseeker_batch_failures_total", 1, "phase" => phase);
}

pub fn set_pending_writes(count: usize) {
    gauge!("airseeker_pending_writes", count as f64);
}
