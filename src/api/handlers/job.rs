//! Run trigger and status handlers.

use axum::{Json, extract::State};

use crate::api::state::AppState;
use crate::domain::{ApiResponse, RunStarted, StatusResponse};
use crate::error::Result;

/// `POST /run`: start a run unless one is active.
pub async fn trigger_run(State(state): State<AppState>) -> Result<Json<ApiResponse<RunStarted>>> {
    let run_id = state.runner.trigger()?;
    Ok(Json(ApiResponse::success(RunStarted {
        started: true,
        run_id,
    })))
}

/// `GET /status`: latest run, the log tail and the gpt-load sidecar.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let latest = state.runner.latest();
    let sidecar = state.sidecar.as_ref().map(|s| s.status());
    Json(StatusResponse::new(latest.as_ref(), state.log_tail.tail()).with_sidecar(sidecar))
}
