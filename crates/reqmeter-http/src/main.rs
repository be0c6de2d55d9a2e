//! reqmeter demo host
//!
//! - Instrumented routes: `/`, `/items/:id`, `/slow`
//! - Ops routes: `/healthz`, `/metrics`
//! - One TCP watcher per configured dependency
//! - Graceful shutdown on Ctrl-C, then watchers are joined

use tracing_subscriber::{fmt, EnvFilter};

use reqmeter_core::error::{ReqMeterError, Result};
use reqmeter_http::{app_state, config, router};

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = std::env::var("REQMETER_CONFIG").unwrap_or_else(|_| "reqmeter.yaml".to_string());
    let cfg = config::load_from_file(&path)?;
    let listen = cfg.server.listen_addr()?;

    let state = app_state::AppState::new(cfg)?;
    let app = router::build_router(state.clone())?;

    tracing::info!(%listen, version = %state.cfg().effective_app_version(), "reqmeter demo host starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| ReqMeterError::Internal(format!("failed to bind {listen}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ReqMeterError::Internal(format!("server failed: {e}")))?;

    state.watchers().shutdown().await;
    tracing::info!("reqmeter demo host stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
