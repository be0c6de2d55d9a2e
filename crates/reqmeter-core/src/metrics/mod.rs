//! In-process metric instruments and registry.
//!
//! Counter, gauge and histogram vectors with declared label names, backed by
//! `DashMap` and atomics, rendered to the Prometheus text format on demand.

pub mod registry;
pub mod vec;

pub use registry::{Metric, MetricRegistry};
pub use vec::{validate_buckets, CounterVec, GaugeVec, HistogramSnapshot, HistogramVec, MetricDesc};
