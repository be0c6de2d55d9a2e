//! reqmeter core: error types, status classification, and the in-process
//! metric model.
//!
//! This crate carries no HTTP or runtime dependencies. It defines the metric
//! instruments, the registry that owns them, and the request observation
//! model that the HTTP integration folds into those instruments.
//!
//! # Defensive guarantees
//! Panics, `unwrap`, and `expect` are compile-denied here. All fallible paths
//! surface as `ReqMeterError`/`Result` so instrumentation never takes the host
//! process down.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod classify;
pub mod error;
pub mod health;
pub mod instruments;
pub mod metrics;

pub use classify::{is_error_status, ErrorClassifier, StatusCodeLike};
pub use error::{ErrorCode, ReqMeterError, Result};
pub use health::Health;
pub use instruments::{HttpInstruments, Observation};
pub use metrics::MetricRegistry;
