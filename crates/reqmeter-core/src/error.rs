//! Shared error type across reqmeter crates.

use std::time::Duration;

use thiserror::Error;

/// Stable error codes (used in logs and by callers matching on failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// After-hook ran without a before-hook start.
    MissingRequestStart,
    /// Metric name collision in the registry.
    DuplicateMetric,
    /// Instrumentation registered twice on one registry.
    AlreadyRegistered,
    /// Label values do not match the declared label names.
    LabelMismatch,
    /// Histogram bucket bounds rejected.
    InvalidBuckets,
    /// Dependency already has a running watcher.
    AlreadyWatching,
    /// Health probe returned an error or panicked.
    ProbeFailed,
    /// Health probe exceeded its deadline.
    ProbeTimeout,
    /// Invalid configuration.
    BadConfig,
    /// Internal error.
    Internal,
}

impl ErrorCode {
    /// String representation used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::MissingRequestStart => "MISSING_REQUEST_START",
            ErrorCode::DuplicateMetric => "DUPLICATE_METRIC",
            ErrorCode::AlreadyRegistered => "ALREADY_REGISTERED",
            ErrorCode::LabelMismatch => "LABEL_MISMATCH",
            ErrorCode::InvalidBuckets => "INVALID_BUCKETS",
            ErrorCode::AlreadyWatching => "ALREADY_WATCHING",
            ErrorCode::ProbeFailed => "PROBE_FAILED",
            ErrorCode::ProbeTimeout => "PROBE_TIMEOUT",
            ErrorCode::BadConfig => "BAD_CONFIG",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// Shared result type.
pub type Result<T> = std::result::Result<T, ReqMeterError>;

/// Unified error type used by core and the HTTP integration.
#[derive(Debug, Error)]
pub enum ReqMeterError {
    #[error("no request start recorded for {method} {path} (before-hook did not run)")]
    MissingRequestStart { method: String, path: String },
    #[error("metric already registered: {0}")]
    DuplicateMetric(String),
    #[error("http instrumentation already registered on this registry")]
    AlreadyRegistered,
    #[error("label mismatch for {metric}: expected {expected} values, got {got}")]
    LabelMismatch {
        metric: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid buckets: {0}")]
    InvalidBuckets(String),
    #[error("dependency already watched: {0}")]
    AlreadyWatching(String),
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("probe timed out after {0:?}")]
    ProbeTimeout(Duration),
    #[error("bad config: {0}")]
    BadConfig(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl ReqMeterError {
    /// Map the error to its stable code.
    pub fn code(&self) -> ErrorCode {
        match self {
            ReqMeterError::MissingRequestStart { .. } => ErrorCode::MissingRequestStart,
            ReqMeterError::DuplicateMetric(_) => ErrorCode::DuplicateMetric,
            ReqMeterError::AlreadyRegistered => ErrorCode::AlreadyRegistered,
            ReqMeterError::LabelMismatch { .. } => ErrorCode::LabelMismatch,
            ReqMeterError::InvalidBuckets(_) => ErrorCode::InvalidBuckets,
            ReqMeterError::AlreadyWatching(_) => ErrorCode::AlreadyWatching,
            ReqMeterError::ProbeFailed(_) => ErrorCode::ProbeFailed,
            ReqMeterError::ProbeTimeout(_) => ErrorCode::ProbeTimeout,
            ReqMeterError::BadConfig(_) => ErrorCode::BadConfig,
            ReqMeterError::Internal(_) => ErrorCode::Internal,
        }
    }
}
