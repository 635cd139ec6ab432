//! Job polling route used by the frontend progress view.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::Router;

use pricematch::jobs::JobStatusView;

use super::price_matching::owned_job;
use super::{ok, ApiResult};
use crate::extract::CurrentUser;
use crate::state::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new().route("/:jobId/status", get(job_status))
}

pub async fn job_status(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    Path(job_id): Path<String>,
) -> ApiResult {
    let job = owned_job(&state, &caller, &job_id)?;
    Ok(ok(JobStatusView::from(&job)))
}
