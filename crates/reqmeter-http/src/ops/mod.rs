//! Operational HTTP endpoints of the demo host.
//!
//! - `/healthz` : liveness plus last known dependency states
//! - `/metrics` : Prometheus text format

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};

use crate::app_state::AppState;

pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let mut deps = Map::new();
    for (name, v) in state.watchers().status() {
        deps.insert(name, v.map(Value::from).unwrap_or(Value::Null));
    }
    (StatusCode::OK, Json(json!({ "status": "ok", "dependencies": deps })))
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let body = state.registry().render();

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
