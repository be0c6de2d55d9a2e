//! MetricRegistry: named metric ownership and text exposition.
//!
//! Metric names are unique across kinds. Registering a name twice fails at
//! registration time instead of surfacing later as a conflicting series.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::vec::{CounterVec, GaugeVec, HistogramVec, MetricDesc};
use crate::error::{ReqMeterError, Result};

/// A registered metric of any kind.
#[derive(Debug, Clone)]
pub enum Metric {
    Counter(Arc<CounterVec>),
    Gauge(Arc<GaugeVec>),
    Histogram(Arc<HistogramVec>),
}

impl Metric {
    fn render(&self, out: &mut String) {
        match self {
            Metric::Counter(c) => c.render(out),
            Metric::Gauge(g) => g.render(out),
            Metric::Histogram(h) => h.render(out),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Metric::Counter(_) => "counter",
            Metric::Gauge(_) => "gauge",
            Metric::Histogram(_) => "histogram",
        }
    }
}

/// Central registry for all instruments of one application.
///
/// Construct once at startup and share via `Arc`.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    metrics: DashMap<String, (usize, Metric)>,
    seq: AtomicUsize,
    http_claimed: AtomicBool,
}

fn valid_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn desc(name: &str, help: &str, labels: &[&str]) -> Result<MetricDesc> {
    if !valid_name(name) {
        return Err(ReqMeterError::BadConfig(format!("invalid metric name: {name:?}")));
    }
    if let Some(l) = labels.iter().find(|l| !valid_name(l) || l.starts_with("__")) {
        return Err(ReqMeterError::BadConfig(format!(
            "invalid label name for {name}: {l:?}"
        )));
    }
    Ok(MetricDesc {
        name: name.to_string(),
        help: help.to_string(),
        labels: labels.iter().map(|s| s.to_string()).collect(),
    })
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, name: &str, metric: Metric) -> Result<()> {
        match self.metrics.entry(name.to_string()) {
            Entry::Occupied(e) => {
                tracing::warn!(metric = %name, existing = e.get().1.kind(), "metric name collision");
                Err(ReqMeterError::DuplicateMetric(name.to_string()))
            }
            Entry::Vacant(v) => {
                let idx = self.seq.fetch_add(1, Ordering::Relaxed);
                v.insert((idx, metric));
                Ok(())
            }
        }
    }

    pub fn register_counter(&self, name: &str, help: &str, labels: &[&str]) -> Result<Arc<CounterVec>> {
        let c = Arc::new(CounterVec::new(desc(name, help, labels)?));
        self.insert(name, Metric::Counter(Arc::clone(&c)))?;
        Ok(c)
    }

    pub fn register_gauge(&self, name: &str, help: &str, labels: &[&str]) -> Result<Arc<GaugeVec>> {
        let g = Arc::new(GaugeVec::new(desc(name, help, labels)?));
        self.insert(name, Metric::Gauge(Arc::clone(&g)))?;
        Ok(g)
    }

    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        labels: &[&str],
        buckets: &[f64],
    ) -> Result<Arc<HistogramVec>> {
        let h = Arc::new(HistogramVec::new(desc(name, help, labels)?, buckets)?);
        self.insert(name, Metric::Histogram(Arc::clone(&h)))?;
        Ok(h)
    }

    /// Return the gauge registered under `name`, creating it on first use.
    ///
    /// Fails if the name is taken by another kind or by a gauge with
    /// different label names.
    pub fn gauge_or_register(&self, name: &str, help: &str, labels: &[&str]) -> Result<Arc<GaugeVec>> {
        let fresh = desc(name, help, labels)?;
        match self.metrics.entry(name.to_string()) {
            Entry::Occupied(e) => match &e.get().1 {
                Metric::Gauge(g) if g.desc().labels == fresh.labels => Ok(Arc::clone(g)),
                _ => Err(ReqMeterError::DuplicateMetric(name.to_string())),
            },
            Entry::Vacant(v) => {
                let g = Arc::new(GaugeVec::new(fresh));
                let idx = self.seq.fetch_add(1, Ordering::Relaxed);
                v.insert((idx, Metric::Gauge(Arc::clone(&g))));
                Ok(g)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Metric> {
        self.metrics.get(name).map(|e| e.value().1.clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.metrics.contains_key(name)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        let mut v: Vec<(usize, String)> = self
            .metrics
            .iter()
            .map(|e| (e.value().0, e.key().clone()))
            .collect();
        v.sort();
        v.into_iter().map(|(_, n)| n).collect()
    }

    /// Claim the HTTP instrument set. Only one claim per registry succeeds.
    pub(crate) fn claim_http(&self) -> Result<()> {
        self.http_claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ReqMeterError::AlreadyRegistered)
    }

    pub(crate) fn release_http(&self) {
        self.http_claimed.store(false, Ordering::Release);
    }

    pub(crate) fn remove(&self, name: &str) {
        self.metrics.remove(name);
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut all: Vec<(usize, Metric)> = self
            .metrics
            .iter()
            .map(|e| (e.value().0, e.value().1.clone()))
            .collect();
        all.sort_by_key(|(i, _)| *i);

        let mut out = String::new();
        for (_, m) in all {
            m.render(&mut out);
        }
        out
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn name_collision_fails_fast() {
        let r = MetricRegistry::new();
        r.register_counter("jobs_total", "jobs", &["status"]).unwrap();
        let err = r
            .register_histogram("jobs_total", "dup", &[], &[1.0])
            .unwrap_err();
        assert_eq!(err.code().as_str(), "DUPLICATE_METRIC");
    }

    #[test]
    fn gauge_or_register_reuses_matching_gauge() {
        let r = MetricRegistry::new();
        let a = r.gauge_or_register("up", "up", &["name"]).unwrap();
        let b = r.gauge_or_register("up", "up", &["name"]).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(r.gauge_or_register("up", "up", &["other"]).is_err());
    }

    #[test]
    fn invalid_names_rejected() {
        let r = MetricRegistry::new();
        assert!(r.register_counter("1bad", "x", &[]).is_err());
        assert!(r.register_counter("ok", "x", &["bad-label"]).is_err());
        assert!(r.register_counter("ok2", "x", &["__reserved"]).is_err());
        assert!(!r.contains("ok"));
    }

    #[test]
    fn render_keeps_registration_order() {
        let r = MetricRegistry::new();
        r.register_gauge("b_gauge", "b", &[]).unwrap();
        r.register_counter("a_total", "a", &[]).unwrap();
        assert_eq!(r.names(), vec!["b_gauge".to_string(), "a_total".to_string()]);

        let out = r.render();
        let b = out.find("# TYPE b_gauge gauge").unwrap();
        let a = out.find("# TYPE a_total counter").unwrap();
        assert!(b < a);
    }
}
