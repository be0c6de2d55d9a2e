//! Axum router wiring for the demo host.
//!
//! Application routes are instrumented; the ops routes are added after
//! registration and stay out of the request metrics.

use std::time::Duration;

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Router,
};

use reqmeter_core::error::Result;

use crate::{app_state::AppState, ops, register::register};

pub fn build_router(state: AppState) -> Result<Router> {
    let app: Router<AppState> = Router::new()
        .route("/", get(index))
        .route("/items/:id", get(item))
        .route("/slow", get(slow));

    let (app, _metrics) = register(app, state.registry(), state.cfg().register_options())?;

    Ok(app
        .route("/healthz", get(ops::healthz))
        .route("/metrics", get(ops::metrics))
        .with_state(state))
}

async fn index() -> &'static str {
    "reqmeter demo\n"
}

async fn item(Path(id): Path<u32>) -> impl IntoResponse {
    if id == 0 {
        return (StatusCode::NOT_FOUND, "no such item").into_response();
    }
    format!("item {id}\n").into_response()
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_millis(400)).await;
    "done\n"
}
