//! Scheduler entry point for external cron triggers.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use super::ApiResult;
use crate::error::ApiError;
use crate::extract::CronAuthorized;
use crate::state::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new().route("/process-jobs", get(process_jobs).post(process_jobs))
}

/// Runs one scheduler pass and reports each dispatch.
pub async fn process_jobs(State(state): State<SharedState>, _cron: CronAuthorized) -> ApiResult {
    let results = state
        .scheduler
        .run_once()
        .await
        .map_err(|e| ApiError::internal("Failed to process jobs", e))?;

    if results.is_empty() {
        return Ok(Json(json!({ "success": true, "message": "No pending jobs" })).into_response());
    }
    Ok(Json(json!({
        "success": true,
        "message": format!("Processed {} jobs", results.len()),
        "results": results,
    }))
    .into_response())
}
