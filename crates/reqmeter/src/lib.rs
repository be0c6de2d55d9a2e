//! Top-level facade crate for reqmeter.
//!
//! Re-exports the core metric model and the axum integration so users can depend on a single crate.

pub mod core {
    pub use reqmeter_core::*;
}

pub mod http {
    pub use reqmeter_http::*;
}

pub use reqmeter_core::{ErrorClassifier, MetricRegistry, ReqMeterError, Result};
pub use reqmeter_http::{register, RegisterOptions, RequestMetrics, Watchers};
