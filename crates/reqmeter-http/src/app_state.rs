//! Shared state of the demo host.
//!
//! Owns the metric registry and the dependency watchers for the process
//! lifetime. Startup errors are returned, not panicked.

use std::sync::Arc;

use reqmeter_core::error::Result;
use reqmeter_core::MetricRegistry;

use crate::config::AppConfig;
use crate::probes::TcpProbe;
use crate::watch::Watchers;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    cfg: AppConfig,
    registry: Arc<MetricRegistry>,
    watchers: Watchers,
}

impl AppState {
    /// Build state and start one TCP watcher per configured dependency.
    /// Must run inside a tokio runtime.
    pub fn new(cfg: AppConfig) -> Result<Self> {
        let registry = Arc::new(MetricRegistry::new());
        let watchers = Watchers::with_defaults(&registry, cfg.watch.options())?;

        for dep in &cfg.dependencies {
            let addr = dep.tcp_addr()?;
            watchers.watch(&dep.name, TcpProbe::new(addr), dep.interval())?;
            tracing::info!(dependency = %dep.name, %addr, "watching dependency");
        }

        Ok(Self {
            inner: Arc::new(AppStateInner {
                cfg,
                registry,
                watchers,
            }),
        })
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.inner.cfg
    }

    pub fn registry(&self) -> &MetricRegistry {
        &self.inner.registry
    }

    pub fn watchers(&self) -> &Watchers {
        &self.inner.watchers
    }
}
