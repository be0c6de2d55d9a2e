//! Labeled metric vectors.
//!
//! Each vector has a fixed, ordered list of label names declared at creation.
//! Series are keyed by the label values in declared order and stored as
//! atomics inside a `DashMap`, so concurrent writers never take a global lock.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::error::{ReqMeterError, Result};

/// Escape a label value for the text exposition format.
fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_help(v: &str) -> String {
    v.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Name, help text and label names of one metric.
#[derive(Debug, Clone)]
pub struct MetricDesc {
    pub name: String,
    pub help: String,
    pub labels: Vec<String>,
}

impl MetricDesc {
    fn key(&self, values: &[&str]) -> Result<Vec<String>> {
        if values.len() != self.labels.len() {
            return Err(ReqMeterError::LabelMismatch {
                metric: self.name.clone(),
                expected: self.labels.len(),
                got: values.len(),
            });
        }
        Ok(values.iter().map(|v| v.to_string()).collect())
    }

    fn label_str(&self, values: &[String]) -> String {
        self.labels
            .iter()
            .zip(values)
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// `name{labels}` or bare `name` when there are no labels.
    fn series(&self, suffix: &str, values: &[String]) -> String {
        let label_str = self.label_str(values);
        if label_str.is_empty() {
            format!("{}{}", self.name, suffix)
        } else {
            format!("{}{}{{{}}}", self.name, suffix, label_str)
        }
    }

    fn header(&self, kind: &str, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, escape_help(&self.help));
        let _ = writeln!(out, "# TYPE {} {}", self.name, kind);
    }
}

fn sorted<V>(map: &DashMap<Vec<String>, V>, mut f: impl FnMut(&V) -> u64) -> Vec<(Vec<String>, u64)> {
    let mut rows: Vec<(Vec<String>, u64)> = map.iter().map(|r| (r.key().clone(), f(r.value()))).collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    rows
}

#[derive(Debug)]
pub struct CounterVec {
    desc: MetricDesc,
    map: DashMap<Vec<String>, AtomicU64>,
}

impl CounterVec {
    pub(crate) fn new(desc: MetricDesc) -> Self {
        Self { desc, map: DashMap::new() }
    }

    pub fn desc(&self) -> &MetricDesc {
        &self.desc
    }

    /// Increment by 1.
    pub fn inc(&self, values: &[&str]) -> Result<()> {
        self.add(values, 1)
    }

    /// Increment by an arbitrary value. Adding zero still creates the series.
    pub fn add(&self, values: &[&str], v: u64) -> Result<()> {
        let key = self.desc.key(values)?;
        let counter = self.map.entry(key).or_insert_with(|| AtomicU64::new(0));
        counter.fetch_add(v, Ordering::Relaxed);
        Ok(())
    }

    /// Current value of one series, `None` if it was never touched.
    pub fn get(&self, values: &[&str]) -> Option<u64> {
        let key = self.desc.key(values).ok()?;
        self.map.get(&key).map(|c| c.load(Ordering::Relaxed))
    }

    pub(crate) fn render(&self, out: &mut String) {
        self.desc.header("counter", out);
        for (key, val) in sorted(&self.map, |c| c.load(Ordering::Relaxed)) {
            let _ = writeln!(out, "{} {}", self.desc.series("", &key), val);
        }
    }
}

#[derive(Debug)]
pub struct GaugeVec {
    desc: MetricDesc,
    map: DashMap<Vec<String>, AtomicI64>,
}

impl GaugeVec {
    pub(crate) fn new(desc: MetricDesc) -> Self {
        Self { desc, map: DashMap::new() }
    }

    pub fn desc(&self) -> &MetricDesc {
        &self.desc
    }

    /// Overwrite the value of one series.
    pub fn set(&self, values: &[&str], v: i64) -> Result<()> {
        let key = self.desc.key(values)?;
        let gauge = self.map.entry(key).or_insert_with(|| AtomicI64::new(0));
        gauge.store(v, Ordering::Relaxed);
        Ok(())
    }

    /// Add an arbitrary signed delta.
    pub fn add(&self, values: &[&str], v: i64) -> Result<()> {
        let key = self.desc.key(values)?;
        let gauge = self.map.entry(key).or_insert_with(|| AtomicI64::new(0));
        gauge.fetch_add(v, Ordering::Relaxed);
        Ok(())
    }

    pub fn get(&self, values: &[&str]) -> Option<i64> {
        let key = self.desc.key(values).ok()?;
        self.map.get(&key).map(|g| g.load(Ordering::Relaxed))
    }

    /// Drop one series so it no longer renders. Returns its last value.
    pub fn remove(&self, values: &[&str]) -> Option<i64> {
        let key = self.desc.key(values).ok()?;
        self.map.remove(&key).map(|(_, g)| g.load(Ordering::Relaxed))
    }

    pub(crate) fn render(&self, out: &mut String) {
        self.desc.header("gauge", out);
        // i64 -> u64 bit cast keeps `sorted` generic; undone below.
        for (key, bits) in sorted(&self.map, |g| g.load(Ordering::Relaxed) as u64) {
            let _ = writeln!(out, "{} {}", self.desc.series("", &key), bits as i64);
        }
    }
}

/// Check bucket bounds: non-empty, finite, non-decreasing.
pub fn validate_buckets(buckets: &[f64]) -> Result<()> {
    if buckets.is_empty() {
        return Err(ReqMeterError::InvalidBuckets("bucket list must not be empty".into()));
    }
    if let Some(b) = buckets.iter().find(|b| !b.is_finite()) {
        return Err(ReqMeterError::InvalidBuckets(format!("bucket bound must be finite: {b}")));
    }
    if let Some(w) = buckets.windows(2).find(|w| matches!(w, [a, b] if b < a)) {
        return Err(ReqMeterError::InvalidBuckets(format!(
            "bucket bounds must be non-decreasing: {:?}",
            w
        )));
    }
    Ok(())
}

struct AtomicHistogram {
    count: AtomicU64,
    sum_bits: AtomicU64,
    buckets: Vec<AtomicU64>,
}

impl AtomicHistogram {
    fn new(n: usize) -> Self {
        Self {
            count: AtomicU64::new(0),
            sum_bits: AtomicU64::new(0f64.to_bits()),
            buckets: (0..n).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn add_sum(&self, v: f64) {
        let mut cur = self.sum_bits.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(cur) + v).to_bits();
            match self
                .sum_bits
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => cur = actual,
            }
        }
    }

    fn sum(&self) -> f64 {
        f64::from_bits(self.sum_bits.load(Ordering::Relaxed))
    }
}

/// Point-in-time read of one histogram series.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum: f64,
    /// `(upper bound, cumulative count)` excluding `+Inf` (which equals `count`).
    pub buckets: Vec<(f64, u64)>,
}

pub struct HistogramVec {
    desc: MetricDesc,
    bounds: Vec<f64>,
    map: DashMap<Vec<String>, AtomicHistogram>,
}

impl HistogramVec {
    pub(crate) fn new(desc: MetricDesc, bounds: &[f64]) -> Result<Self> {
        validate_buckets(bounds)?;
        Ok(Self {
            desc,
            bounds: bounds.to_vec(),
            map: DashMap::new(),
        })
    }

    pub fn desc(&self) -> &MetricDesc {
        &self.desc
    }

    /// Configured upper bounds (without `+Inf`).
    pub fn buckets(&self) -> &[f64] {
        &self.bounds
    }

    /// Observe a value and increment cumulative buckets.
    pub fn observe(&self, values: &[&str], v: f64) -> Result<()> {
        let key = self.desc.key(values)?;
        let n = self.bounds.len();
        let hist = self.map.entry(key).or_insert_with(|| AtomicHistogram::new(n));

        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.add_sum(v);

        for (i, &b) in self.bounds.iter().enumerate() {
            if v <= b {
                if let Some(slot) = hist.buckets.get(i) {
                    slot.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(())
    }

    pub fn snapshot(&self, values: &[&str]) -> Option<HistogramSnapshot> {
        let key = self.desc.key(values).ok()?;
        let hist = self.map.get(&key)?;
        Some(Self::read(&self.bounds, &hist))
    }

    fn read(bounds: &[f64], hist: &AtomicHistogram) -> HistogramSnapshot {
        HistogramSnapshot {
            count: hist.count.load(Ordering::Relaxed),
            sum: hist.sum(),
            buckets: bounds
                .iter()
                .zip(&hist.buckets)
                .map(|(&le, c)| (le, c.load(Ordering::Relaxed)))
                .collect(),
        }
    }

    pub(crate) fn render(&self, out: &mut String) {
        self.desc.header("histogram", out);
        let mut rows: Vec<(Vec<String>, HistogramSnapshot)> = self
            .map
            .iter()
            .map(|r| (r.key().clone(), Self::read(&self.bounds, r.value())))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));

        let name = &self.desc.name;
        for (key, snap) in rows {
            let label_str = self.desc.label_str(&key);
            let prefix = if label_str.is_empty() { String::new() } else { format!("{},", label_str) };

            for (le, count) in &snap.buckets {
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le, count);
            }
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, snap.count);
            let _ = writeln!(out, "{} {}", self.desc.series("_sum", &key), snap.sum);
            let _ = writeln!(out, "{} {}", self.desc.series("_count", &key), snap.count);
        }
    }
}

impl std::fmt::Debug for HistogramVec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistogramVec")
            .field("desc", &self.desc)
            .field("bounds", &self.bounds)
            .field("series", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn desc(labels: &[&str]) -> MetricDesc {
        MetricDesc {
            name: "t".into(),
            help: "test".into(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let h = HistogramVec::new(desc(&["k"]), &[0.1, 0.3, 1.5]).unwrap();
        h.observe(&["a"], 0.05).unwrap();
        h.observe(&["a"], 0.2).unwrap();
        h.observe(&["a"], 0.3).unwrap();
        h.observe(&["a"], 9.0).unwrap();

        let s = h.snapshot(&["a"]).unwrap();
        assert_eq!(s.count, 4);
        assert!((s.sum - 9.55).abs() < 1e-9);
        assert_eq!(s.buckets, vec![(0.1, 1), (0.3, 3), (1.5, 3)]);
    }

    #[test]
    fn label_arity_is_checked() {
        let c = CounterVec::new(desc(&["a", "b"]));
        let err = c.inc(&["only-one"]).unwrap_err();
        assert_eq!(err.code().as_str(), "LABEL_MISMATCH");
        assert!(c.get(&["only-one"]).is_none());
    }

    #[test]
    fn gauge_set_is_last_write_wins() {
        let g = GaugeVec::new(desc(&["name"]));
        g.set(&["db"], 1).unwrap();
        g.set(&["db"], 0).unwrap();
        assert_eq!(g.get(&["db"]), Some(0));
        g.add(&["db"], -2).unwrap();
        assert_eq!(g.get(&["db"]), Some(-2));
    }

    #[test]
    fn removed_gauge_series_stops_rendering() {
        let g = GaugeVec::new(desc(&["name"]));
        g.set(&["db"], 1).unwrap();
        g.set(&["cache"], 1).unwrap();
        assert_eq!(g.remove(&["db"]), Some(1));
        assert_eq!(g.remove(&["db"]), None);

        let mut out = String::new();
        g.render(&mut out);
        assert!(!out.contains("name=\"db\""));
        assert!(out.contains("t{name=\"cache\"} 1"));
    }

    #[test]
    fn bucket_validation() {
        assert!(validate_buckets(&[]).is_err());
        assert!(validate_buckets(&[0.1, f64::NAN]).is_err());
        assert!(validate_buckets(&[1.0, 0.5]).is_err());
        assert!(validate_buckets(&[0.1, 0.1, 2.0]).is_ok());
    }

    #[test]
    fn render_escapes_label_values() {
        let c = CounterVec::new(desc(&["path"]));
        c.add(&["/a\"b"], 3).unwrap();
        let mut out = String::new();
        c.render(&mut out);
        assert!(out.contains("# TYPE t counter"));
        assert!(out.contains("t{path=\"/a\\\"b\"} 3"));
    }
}
