//! Metrics sinks
//!
//! The allocator only knows the [`MetricsSink`] boundary. [`NoopMetrics`] is
//! the default; [`MetricsFacade`] forwards to the `metrics` crate so whatever
//! recorder the process installed (Prometheus exporter, test recorder, ...)
//! receives the values.

use std::fmt;

/// Gauge carrying the bytes currently reserved in the pool
pub const RESERVED_BYTES: &str = "chunkslab_reserved_bytes";
/// Histogram of `allocate_chunks` latency in seconds
pub const ALLOCATION_SECONDS: &str = "chunkslab_allocation_seconds";

/// Destination for allocator measurements
pub trait MetricsSink: Send + Sync + fmt::Debug {
    /// Set a gauge to `value`
    fn gauge(&self, name: &str, value: f64);

    /// Record one histogram observation
    fn histogram(&self, name: &str, value: f64);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn gauge(&self, _name: &str, _value: f64) {}

    fn histogram(&self, _name: &str, _value: f64) {}
}

/// Forwards to the global `metrics` recorder
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsFacade;

impl MetricsSink for MetricsFacade {
    fn gauge(&self, name: &str, value: f64) {
        ::metrics::gauge!(name.to_owned()).set(value);
    }

    fn histogram(&self, name: &str, value: f64) {
        ::metrics::histogram!(name.to_owned()).record(value);
    }
}
