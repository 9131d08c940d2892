use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::ProxyState;

/// GET /health: liveness check.
pub async fn health_handler(State(state): State<Arc<ProxyState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "base_path": state.config.base_path,
        "routes": state.routes.iter().count(),
    }))
}
