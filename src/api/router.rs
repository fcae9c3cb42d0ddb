//! Router setup and configuration.

use axum::{
    Router,
    http::Uri,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::api::handlers::{health, job, page};
use crate::api::state::AppState;
use crate::error::AppError;

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(page::index))
        .route("/log", get(page::log_page))
        .route("/run", post(job::trigger_run))
        .route("/status", get(job::status))
        .route("/health", get(health::health))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}
