//! Health check handler.

use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::api::state::AppState;

/// Liveness probe - always returns 200 if the service is running.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "code": 0,
        "message": "success",
        "data": {
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "running": state.runner.is_busy()
        }
    }))
}
