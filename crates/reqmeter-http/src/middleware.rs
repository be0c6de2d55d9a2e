//! Request timing middleware.
//!
//! Two hooks around every request:
//! - before: stash a monotonic start time in the request extensions
//! - after: derive labels from the finished response and record latency and
//!   response size
//!
//! The size is the declared `Content-Length`. Most axum responses do not carry
//! that header yet when the middleware sees them (hyper adds it while
//! writing), so the exact body size hint stands in for it. Streaming bodies
//! without an exact size count as 0.
//!
//! The axum layer runs both hooks inside one `from_fn_with_state` middleware,
//! so the before-hook of a request always completes before its after-hook.
//! The response is passed through untouched whether recording succeeds or not.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::HttpBody,
    extract::{MatchedPath, Request, State},
    http::{header::CONTENT_LENGTH, HeaderMap, Method},
    middleware::Next,
    response::Response,
};

use reqmeter_core::error::{ReqMeterError, Result};
use reqmeter_core::{ErrorClassifier, HttpInstruments, Observation};

use crate::register::PathLabel;

/// Request-scoped start time inserted by the before-hook.
#[derive(Debug, Clone, Copy)]
pub struct RequestStart(pub Instant);

/// Declared `Content-Length`, or 0 when absent or unparseable.
pub fn content_length(headers: &HeaderMap) -> u64 {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(0)
}

/// Response size in bytes: the `Content-Length` header when set, else the
/// exact size hint of the body, else 0.
pub fn response_size<B: HttpBody>(response: &axum::http::Response<B>) -> u64 {
    if response.headers().contains_key(CONTENT_LENGTH) {
        return content_length(response.headers());
    }
    response.body().size_hint().exact().unwrap_or(0)
}

/// Per-registration hook state. Cheap to clone.
#[derive(Clone, Debug)]
pub struct RequestMetrics {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    instruments: HttpInstruments,
    classifier: ErrorClassifier,
    app_version: String,
    path_label: PathLabel,
    skipped: AtomicU64,
}

impl RequestMetrics {
    pub(crate) fn new(
        instruments: HttpInstruments,
        classifier: ErrorClassifier,
        app_version: String,
        path_label: PathLabel,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                instruments,
                classifier,
                app_version,
                path_label,
                skipped: AtomicU64::new(0),
            }),
        }
    }

    pub fn instruments(&self) -> &HttpInstruments {
        &self.inner.instruments
    }

    pub fn app_version(&self) -> &str {
        &self.inner.app_version
    }

    /// Requests this layer left to an outer instrumentation layer.
    pub fn skipped(&self) -> u64 {
        self.inner.skipped.load(Ordering::Relaxed)
    }

    /// Before-hook: record the start time on the request.
    ///
    /// Returns `false` without touching the request when a start is already
    /// present, i.e. an outer layer instruments the same request.
    pub fn before_request<B>(&self, request: &mut axum::http::Request<B>) -> bool {
        if request.extensions().get::<RequestStart>().is_some() {
            return false;
        }
        request.extensions_mut().insert(RequestStart(Instant::now()));
        true
    }

    /// After-hook: build the observation and fold it into the instruments.
    pub fn after_request<B: HttpBody>(
        &self,
        start: Option<RequestStart>,
        method: &Method,
        path: &str,
        response: &axum::http::Response<B>,
    ) -> Result<Observation> {
        let start = start.ok_or_else(|| ReqMeterError::MissingRequestStart {
            method: method.to_string(),
            path: path.to_string(),
        })?;

        let status = response.status().as_u16();
        let obs = Observation {
            status,
            method: method.as_str().to_string(),
            path: path.to_string(),
            app_version: self.inner.app_version.clone(),
            is_error: self.inner.classifier.classify(&status),
            latency: start.0.elapsed().as_secs_f64(),
            size: response_size(response),
        };
        self.inner.instruments.record(&obs)?;
        Ok(obs)
    }

    fn path_of<B>(&self, request: &axum::http::Request<B>) -> String {
        match self.inner.path_label {
            PathLabel::Raw => request.uri().path().to_string(),
            PathLabel::Matched => request
                .extensions()
                .get::<MatchedPath>()
                .map(|mp| mp.as_str().to_string())
                .unwrap_or_else(|| request.uri().path().to_string()),
        }
    }
}

/// axum middleware running both hooks around the inner service.
pub async fn track_request(
    State(metrics): State<RequestMetrics>,
    mut request: Request,
    next: Next,
) -> Response {
    if !metrics.before_request(&mut request) {
        if metrics.inner.skipped.fetch_add(1, Ordering::Relaxed) == 0 {
            tracing::warn!(
                target: "reqmeter.middleware",
                code = ReqMeterError::AlreadyRegistered.code().as_str(),
                path = %request.uri().path(),
                "request metrics layered twice; the inner layer records nothing"
            );
        }
        return next.run(request).await;
    }

    let method = request.method().clone();
    let path = metrics.path_of(&request);
    let start = request.extensions().get::<RequestStart>().copied();

    let response = next.run(request).await;

    match metrics.after_request(start, &method, &path, &response) {
        Ok(obs) => {
            tracing::trace!(
                target: "reqmeter.middleware",
                status = obs.status,
                %method,
                %path,
                latency = obs.latency,
                size = obs.size,
                "request recorded"
            );
        }
        Err(e) => {
            tracing::error!(
                target: "reqmeter.middleware",
                code = e.code().as_str(),
                error = %e,
                %method,
                %path,
                "request metrics not recorded"
            );
        }
    }

    response
}
