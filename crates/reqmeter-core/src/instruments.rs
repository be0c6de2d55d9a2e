//! The HTTP instrument set: latency histogram, response size counter,
//! application info gauge and dependency gauge.

use std::sync::Arc;

use crate::error::Result;
use crate::health::Health;
use crate::metrics::{CounterVec, GaugeVec, HistogramVec, MetricRegistry};

pub const LATENCY_METRIC: &str = "request_seconds";
pub const SIZE_METRIC: &str = "response_size_bytes";
pub const APP_INFO_METRIC: &str = "app_info";
pub const DEPENDENCY_UP_METRIC: &str = "dependency_up";

/// Label names shared by the latency histogram and the size counter.
pub const HTTP_LABELS: [&str; 6] = ["type", "status", "method", "addr", "version", "isError"];

/// Latency buckets in seconds used when none are supplied.
pub const DEFAULT_BUCKETS: [f64; 4] = [0.1, 0.3, 1.5, 10.5];

/// Version label used when the application does not configure one.
pub const DEFAULT_APP_VERSION: &str = "0.0.0";

/// One request outcome, folded into the instruments and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub status: u16,
    pub method: String,
    pub path: String,
    pub app_version: String,
    pub is_error: bool,
    /// Seconds.
    pub latency: f64,
    /// Bytes, from the declared content length.
    pub size: u64,
}

impl Observation {
    /// Label values in `HTTP_LABELS` order.
    pub fn label_values(&self) -> [String; 6] {
        [
            "http".to_string(),
            self.status.to_string(),
            self.method.clone(),
            self.path.clone(),
            self.app_version.clone(),
            self.is_error.to_string(),
        ]
    }
}

/// Gauge recording `1`/`0` per dependency name. Shared by every watcher of a registry.
pub fn dependency_gauge(registry: &MetricRegistry) -> Result<Arc<GaugeVec>> {
    registry.gauge_or_register(
        DEPENDENCY_UP_METRIC,
        "records if a dependency is up or down. 1 for up, 0 for down",
        &["name"],
    )
}

pub fn set_dependency(gauge: &GaugeVec, name: &str, health: Health) -> Result<()> {
    gauge.set(&[name], health.as_gauge())
}

/// Handles to the per-request instruments of one registration.
#[derive(Debug, Clone)]
pub struct HttpInstruments {
    latency: Arc<HistogramVec>,
    size: Arc<CounterVec>,
    app_info: Arc<GaugeVec>,
    dependency_up: Arc<GaugeVec>,
}

impl HttpInstruments {
    /// Create the instrument set on `registry`.
    ///
    /// A registry carries at most one set; a second call fails with
    /// `AlreadyRegistered`. Name collisions with metrics the application
    /// registered itself fail with `DuplicateMetric` and leave the registry
    /// unclaimed.
    pub fn register(registry: &MetricRegistry, buckets: Option<&[f64]>) -> Result<Self> {
        registry.claim_http()?;
        match Self::create(registry, buckets.unwrap_or(&DEFAULT_BUCKETS[..])) {
            Ok(set) => Ok(set),
            Err(e) => {
                registry.release_http();
                Err(e)
            }
        }
    }

    fn create(registry: &MetricRegistry, buckets: &[f64]) -> Result<Self> {
        let latency = registry.register_histogram(
            LATENCY_METRIC,
            "records in a histogram the number of http requests and their duration in seconds",
            &HTTP_LABELS,
            buckets,
        )?;
        let size = match registry.register_counter(
            SIZE_METRIC,
            "counts the size of each http response",
            &HTTP_LABELS,
        ) {
            Ok(c) => c,
            Err(e) => {
                registry.remove(LATENCY_METRIC);
                return Err(e);
            }
        };
        let app_info = match registry.gauge_or_register(
            APP_INFO_METRIC,
            "application version info, always 1",
            &["version"],
        ) {
            Ok(g) => g,
            Err(e) => {
                registry.remove(LATENCY_METRIC);
                registry.remove(SIZE_METRIC);
                return Err(e);
            }
        };
        let dependency_up = match dependency_gauge(registry) {
            Ok(g) => g,
            Err(e) => {
                registry.remove(LATENCY_METRIC);
                registry.remove(SIZE_METRIC);
                return Err(e);
            }
        };

        Ok(Self {
            latency,
            size,
            app_info,
            dependency_up,
        })
    }

    /// Record latency and size under the observation's label tuple.
    pub fn record(&self, obs: &Observation) -> Result<()> {
        let owned = obs.label_values();
        let values: Vec<&str> = owned.iter().map(String::as_str).collect();
        self.latency.observe(&values, obs.latency)?;
        self.size.add(&values, obs.size)
    }

    pub fn set_app_info(&self, version: &str) -> Result<()> {
        self.app_info.set(&[version], 1)
    }

    pub fn latency(&self) -> &HistogramVec {
        &self.latency
    }

    pub fn size(&self) -> &CounterVec {
        &self.size
    }

    pub fn app_info(&self) -> &GaugeVec {
        &self.app_info
    }

    pub fn dependency_up(&self) -> &Arc<GaugeVec> {
        &self.dependency_up
    }
}
