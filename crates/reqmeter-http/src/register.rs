//! Registration entry point: build the HTTP instruments on a registry and
//! attach the timing middleware to an axum router.

use axum::{middleware, Router};
use serde::Deserialize;

use reqmeter_core::error::Result;
use reqmeter_core::instruments::DEFAULT_APP_VERSION;
use reqmeter_core::{ErrorClassifier, HttpInstruments, MetricRegistry};

use crate::middleware::{track_request, RequestMetrics};

/// Which path goes into the `addr` label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathLabel {
    /// The request path as received.
    #[default]
    Raw,
    /// The route template (`/users/:id`), falling back to the raw path for
    /// requests no route matched.
    Matched,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    /// Histogram upper bounds in seconds. Defaults to `[0.1, 0.3, 1.5, 10.5]`.
    pub buckets: Option<Vec<f64>>,
    /// Replaces the default 4xx/5xx rule for this registration.
    pub classifier: Option<ErrorClassifier>,
    /// Value of the `version` label. Defaults to `"0.0.0"`.
    pub app_version: Option<String>,
    pub path_label: PathLabel,
}

impl RegisterOptions {
    pub fn with_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_app_version(mut self, version: impl Into<String>) -> Self {
        self.app_version = Some(version.into());
        self
    }

    pub fn with_path_label(mut self, path_label: PathLabel) -> Self {
        self.path_label = path_label;
        self
    }
}

/// Create the request instruments on `registry` without attaching them.
///
/// Used by `register`; exposed for hosts that wire the hooks themselves.
pub fn request_metrics(registry: &MetricRegistry, options: RegisterOptions) -> Result<RequestMetrics> {
    let instruments = HttpInstruments::register(registry, options.buckets.as_deref())?;
    let app_version = options
        .app_version
        .unwrap_or_else(|| DEFAULT_APP_VERSION.to_string());
    instruments.set_app_info(&app_version)?;

    Ok(RequestMetrics::new(
        instruments,
        options.classifier.unwrap_or_default(),
        app_version,
        options.path_label,
    ))
}

/// Instrument every route of `app`.
///
/// Fails when the registry already carries HTTP instruments, when a metric
/// name is taken, or when the buckets are invalid. Routes added to the
/// returned router afterwards are not instrumented.
pub fn register<S>(
    app: Router<S>,
    registry: &MetricRegistry,
    options: RegisterOptions,
) -> Result<(Router<S>, RequestMetrics)>
where
    S: Clone + Send + Sync + 'static,
{
    let metrics = request_metrics(registry, options)?;

    tracing::info!(
        target: "reqmeter.middleware",
        version = %metrics.app_version(),
        buckets = ?metrics.instruments().latency().buckets(),
        "request metrics registered"
    );

    let app = app.layer(middleware::from_fn_with_state(metrics.clone(), track_request));
    Ok((app, metrics))
}
