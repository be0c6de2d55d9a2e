//! reqmeter HTTP integration.
//!
//! This crate attaches the request timing hooks to an axum router, runs the
//! dependency watchers, and loads the YAML config. The demo host binary
//! (`main.rs`) and the integration tests consume it.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod app_state;
pub mod config;
pub mod middleware;
pub mod ops;
pub mod probes;
pub mod register;
pub mod router;
pub mod watch;

pub use middleware::{content_length, response_size, track_request, RequestMetrics, RequestStart};
pub use register::{register, request_metrics, PathLabel, RegisterOptions};
pub use watch::{probe_fn, FailurePolicy, Probe, WatchHandle, WatchOptions, Watchers};
