use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use reqmeter_core::error::{ReqMeterError, Result};
use reqmeter_core::instruments::DEFAULT_APP_VERSION;
use reqmeter_core::metrics::validate_buckets;

use crate::register::{PathLabel, RegisterOptions};
use crate::watch::{FailurePolicy, WatchOptions};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub version: u32,

    #[serde(default)]
    pub app_version: Option<String>,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub metrics: MetricsSection,

    #[serde(default)]
    pub watch: WatchSection,

    #[serde(default)]
    pub dependencies: Vec<DependencyConfig>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(ReqMeterError::BadConfig(format!(
                "unsupported config version: {}",
                self.version
            )));
        }

        self.server.validate()?;
        self.metrics.validate()?;
        self.watch.validate()?;

        let mut seen = HashSet::new();
        for d in &self.dependencies {
            d.validate()?;
            if !seen.insert(d.name.as_str()) {
                return Err(ReqMeterError::BadConfig(format!(
                    "duplicate dependency name: {}",
                    d.name
                )));
            }
        }
        Ok(())
    }

    /// `APP_VERSION` from the environment wins over the file value.
    pub fn effective_app_version(&self) -> String {
        resolve_app_version(self.app_version.as_deref(), std::env::var("APP_VERSION").ok())
    }

    pub fn register_options(&self) -> RegisterOptions {
        RegisterOptions {
            buckets: self.metrics.buckets.clone(),
            classifier: None,
            app_version: Some(self.effective_app_version()),
            path_label: self.metrics.path_label,
        }
    }
}

pub fn resolve_app_version(configured: Option<&str>, env: Option<String>) -> String {
    env.filter(|v| !v.trim().is_empty())
        .or_else(|| configured.map(str::to_string))
        .unwrap_or_else(|| DEFAULT_APP_VERSION.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl ServerSection {
    pub fn validate(&self) -> Result<()> {
        self.listen_addr().map(|_| ())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.listen.parse().map_err(|e| {
            ReqMeterError::BadConfig(format!("server.listen must be a valid SocketAddr: {e}"))
        })
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".into()
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MetricsSection {
    /// Latency buckets in seconds. Omit for the defaults.
    #[serde(default)]
    pub buckets: Option<Vec<f64>>,

    #[serde(default)]
    pub path_label: PathLabel,
}

impl MetricsSection {
    pub fn validate(&self) -> Result<()> {
        match &self.buckets {
            Some(b) => validate_buckets(b),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchSection {
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: u64,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,

    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            interval_secs: default_interval_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            on_failure: FailurePolicy::default(),
        }
    }
}

impl WatchSection {
    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(ReqMeterError::BadConfig(
                "watch.interval_secs must be at least 1".into(),
            ));
        }
        if self.probe_timeout_secs == 0 {
            return Err(ReqMeterError::BadConfig(
                "watch.probe_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn options(&self) -> WatchOptions {
        WatchOptions {
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            interval: Duration::from_secs(self.interval_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            on_failure: self.on_failure,
        }
    }
}

fn default_initial_delay_secs() -> u64 {
    10
}
fn default_interval_secs() -> u64 {
    1500
}
fn default_probe_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DependencyConfig {
    pub name: String,
    /// `host:port` reached with a TCP connect probe.
    pub tcp: String,
    /// Overrides `watch.interval_secs` for this dependency.
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

impl DependencyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ReqMeterError::BadConfig("dependency name must not be empty".into()));
        }
        if self.interval_secs == Some(0) {
            return Err(ReqMeterError::BadConfig(format!(
                "dependency {}: interval_secs must be at least 1",
                self.name
            )));
        }
        self.tcp_addr().map(|_| ())
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr> {
        self.tcp.parse().map_err(|e| {
            ReqMeterError::BadConfig(format!(
                "dependency {}: tcp must be a valid SocketAddr: {e}",
                self.name
            ))
        })
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs.map(Duration::from_secs)
    }
}
