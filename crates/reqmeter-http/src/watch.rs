//! Dependency watcher background tasks.
//!
//! Each watched dependency gets one task that probes it after an initial
//! delay and then once per interval, writing `1`/`0` into the
//! `dependency_up{name}` gauge. The next cycle starts only after the current
//! probe finished.
//!
//! # Supervision
//!
//! A probe error, timeout or panic is logged and the schedule continues. The
//! gauge is then handled per [`FailurePolicy`].
//!
//! # Graceful Shutdown
//!
//! Every task listens on a child of the [`Watchers`] cancellation token.
//! `Watchers::shutdown` cancels and joins all of them; dropping `Watchers`
//! cancels without joining.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::FutureExt;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use reqmeter_core::error::{ReqMeterError, Result};
use reqmeter_core::instruments::{dependency_gauge, set_dependency};
use reqmeter_core::metrics::GaugeVec;
use reqmeter_core::{Health, MetricRegistry};

pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1500);
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

pub type ProbeError = Box<dyn std::error::Error + Send + Sync>;

/// A dependency health check.
#[async_trait]
pub trait Probe: Send + Sync + 'static {
    async fn check(&self) -> std::result::Result<Health, ProbeError>;
}

/// Adapter turning an async closure into a [`Probe`].
pub struct FnProbe<F>(F);

/// Wrap a closure returning `Result<T, E>` where `T` maps to up/down
/// (`bool`, or an integer where non-zero is up).
pub fn probe_fn<F, Fut, T, E>(f: F) -> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Into<Health> + Send + 'static,
    E: Into<ProbeError> + Send + 'static,
{
    FnProbe(f)
}

#[async_trait]
impl<F, Fut, T, E> Probe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    T: Into<Health> + Send + 'static,
    E: Into<ProbeError> + Send + 'static,
{
    async fn check(&self) -> std::result::Result<Health, ProbeError> {
        (self.0)().await.map(Into::into).map_err(Into::into)
    }
}

/// What a failed cycle writes to the gauge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the dependency as down.
    #[default]
    MarkDown,
    /// Leave the last recorded value in place.
    KeepLast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub initial_delay: Duration,
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub on_failure: FailurePolicy,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            interval: DEFAULT_INTERVAL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            on_failure: FailurePolicy::default(),
        }
    }
}

/// Run one probe under a deadline, converting errors and panics.
pub async fn probe_once(probe: &dyn Probe, deadline: Duration) -> Result<Health> {
    match tokio::time::timeout(deadline, AssertUnwindSafe(probe.check()).catch_unwind()).await {
        Err(_) => Err(ReqMeterError::ProbeTimeout(deadline)),
        Ok(Err(_)) => Err(ReqMeterError::ProbeFailed("probe panicked".into())),
        Ok(Ok(Err(e))) => Err(ReqMeterError::ProbeFailed(e.to_string())),
        Ok(Ok(Ok(h))) => Ok(h),
    }
}

fn record(gauge: &GaugeVec, name: &str, health: Health) {
    if let Err(e) = set_dependency(gauge, name, health) {
        warn!(target: "reqmeter.watch", dependency = %name, error = %e, "failed to set dependency gauge");
    }
}

async fn run_watch(
    name: String,
    probe: Arc<dyn Probe>,
    gauge: Arc<GaugeVec>,
    opts: WatchOptions,
    cancel: CancellationToken,
) {
    info!(
        target: "reqmeter.watch",
        dependency = %name,
        initial_delay_secs = opts.initial_delay.as_secs_f64(),
        interval_secs = opts.interval.as_secs_f64(),
        "Starting dependency watcher"
    );

    let mut wait = opts.initial_delay;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            r = probe_once(probe.as_ref(), opts.probe_timeout) => r,
        };

        match outcome {
            Ok(health) => {
                tracing::debug!(target: "reqmeter.watch", dependency = %name, up = health.is_up(), "probe finished");
                record(&gauge, &name, health);
            }
            Err(e) => {
                warn!(
                    target: "reqmeter.watch",
                    dependency = %name,
                    code = e.code().as_str(),
                    error = %e,
                    policy = ?opts.on_failure,
                    "probe failed, schedule continues"
                );
                if opts.on_failure == FailurePolicy::MarkDown {
                    record(&gauge, &name, Health::Down);
                }
            }
        }

        wait = opts.interval;
    }

    info!(target: "reqmeter.watch", dependency = %name, "Dependency watcher stopped");
}

/// Handle to one running watcher.
#[derive(Debug)]
pub struct WatchHandle {
    name: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request the task to stop after its current step.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the task to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(target: "reqmeter.watch", dependency = %self.name, error = %e, "watcher task ended abnormally");
        }
    }
}

/// Spawn a watcher writing into `gauge`. Requires a running tokio runtime.
pub fn spawn_watch(
    name: &str,
    probe: Arc<dyn Probe>,
    gauge: Arc<GaugeVec>,
    opts: WatchOptions,
    cancel: CancellationToken,
) -> Result<WatchHandle> {
    if opts.interval.is_zero() {
        return Err(ReqMeterError::BadConfig("watch interval must be greater than zero".into()));
    }
    let rt = tokio::runtime::Handle::try_current()
        .map_err(|e| ReqMeterError::Internal(format!("no tokio runtime for watcher: {e}")))?;
    let task = rt.spawn(run_watch(
        name.to_string(),
        probe,
        gauge,
        opts,
        cancel.clone(),
    ));
    Ok(WatchHandle {
        name: name.to_string(),
        cancel,
        task,
    })
}

/// The set of dependency watchers of one registry.
pub struct Watchers {
    gauge: Arc<GaugeVec>,
    root: CancellationToken,
    defaults: WatchOptions,
    tasks: DashMap<String, WatchHandle>,
}

impl Watchers {
    pub fn new(registry: &MetricRegistry) -> Result<Self> {
        Self::with_defaults(registry, WatchOptions::default())
    }

    pub fn with_defaults(registry: &MetricRegistry, defaults: WatchOptions) -> Result<Self> {
        Ok(Self {
            gauge: dependency_gauge(registry)?,
            root: CancellationToken::new(),
            defaults,
            tasks: DashMap::new(),
        })
    }

    /// Watch `name` with the default options, overriding the interval when given.
    pub fn watch<P: Probe>(&self, name: &str, probe: P, interval: Option<Duration>) -> Result<()> {
        let mut opts = self.defaults;
        if let Some(i) = interval {
            opts.interval = i;
        }
        self.watch_with(name, probe, opts)
    }

    pub fn watch_with<P: Probe>(&self, name: &str, probe: P, opts: WatchOptions) -> Result<()> {
        if name.is_empty() {
            return Err(ReqMeterError::BadConfig("dependency name must not be empty".into()));
        }
        if self.root.is_cancelled() {
            return Err(ReqMeterError::Internal("watchers already shut down".into()));
        }

        match self.tasks.entry(name.to_string()) {
            Entry::Occupied(mut e) => {
                if !e.get().is_finished() {
                    return Err(ReqMeterError::AlreadyWatching(name.to_string()));
                }
                let handle = spawn_watch(name, Arc::new(probe), Arc::clone(&self.gauge), opts, self.root.child_token())?;
                e.insert(handle);
            }
            Entry::Vacant(v) => {
                let handle = spawn_watch(name, Arc::new(probe), Arc::clone(&self.gauge), opts, self.root.child_token())?;
                v.insert(handle);
            }
        }
        Ok(())
    }

    /// Stop watching `name` and drop its `dependency_up` series. Returns
    /// `false` if it was not watched.
    pub async fn unwatch(&self, name: &str) -> bool {
        match self.tasks.remove(name) {
            Some((_, handle)) => {
                handle.stop().await;
                self.gauge.remove(&[name]);
                true
            }
            None => false,
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut v: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        v.sort();
        v
    }

    /// Last recorded value per watched dependency (`None` before the first cycle).
    pub fn status(&self) -> Vec<(String, Option<i64>)> {
        self.names()
            .into_iter()
            .map(|n| {
                let v = self.gauge.get(&[n.as_str()]);
                (n, v)
            })
            .collect()
    }

    pub fn gauge(&self) -> &Arc<GaugeVec> {
        &self.gauge
    }

    /// Cancel every watcher and wait for all of them to exit.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let names: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        let handles: Vec<WatchHandle> = names
            .iter()
            .filter_map(|n| self.tasks.remove(n).map(|(_, h)| h))
            .collect();
        for h in handles {
            h.stop().await;
        }
        info!(target: "reqmeter.watch", stopped = names.len(), "All dependency watchers stopped");
    }
}

impl Drop for Watchers {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl std::fmt::Debug for Watchers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchers")
            .field("names", &self.names())
            .field("defaults", &self.defaults)
            .finish()
    }
}
