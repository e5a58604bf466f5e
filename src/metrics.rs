//! Metrics instrumentation for keycast.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The embedding binary is responsible for choosing the exporter
//! (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `keycast_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `tier`: persistent, memory
//! - `op`: set, del
//! - `status`: ok, error, timeout, rejected

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a storage change event picked up by a dispatcher worker
pub fn record_event(tier: &str, op: &str) {
    counter!(
        "keycast_events_total",
        "tier" => tier.to_string(),
        "op" => op.to_string()
    )
    .increment(1);
}

/// Record one broadcast fan-out and how many pools it reached
pub fn record_broadcast(tier: &str, pools: usize) {
    counter!(
        "keycast_broadcasts_total",
        "tier" => tier.to_string()
    )
    .increment(1);
    histogram!(
        "keycast_broadcast_pools",
        "tier" => tier.to_string()
    )
    .record(pools as f64);
}

/// Record the outcome of one frame write
pub fn record_write(status: &str) {
    counter!(
        "keycast_writes_total",
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record frame write latency
pub fn record_write_latency(duration: Duration) {
    histogram!("keycast_write_seconds").record(duration.as_secs_f64());
}

/// Set the current number of live subscriber connections
pub fn set_connections(count: usize) {
    gauge!("keycast_connections").set(count as f64);
}

/// Record a refused subscription (audit, invalid key, static mode)
pub fn record_refused(reason: &str) {
    counter!(
        "keycast_refused_total",
        "reason" => reason.to_string()
    )
    .increment(1);
}
