//! Dashboard routes

use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use pricematch::db::job_repo::{self, JobFilter};
use pricematch::db::{activity_repo, stats_repo};
use pricematch::jobs::JobStatusView;

use super::{ok, ApiResult};
use crate::extract::CurrentUser;
use crate::state::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/stats", get(stats))
        .route("/activity", get(activity))
        .route("/recent-jobs", get(recent_jobs))
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<u64>,
}

impl LimitQuery {
    fn limit_or(&self, default: u64) -> u64 {
        self.limit.unwrap_or(default).clamp(1, 100)
    }
}

pub async fn stats(State(state): State<SharedState>, CurrentUser(caller): CurrentUser) -> ApiResult {
    let stats = stats_repo::dashboard_stats(&state.db, &caller.user_id, chrono::Utc::now())?;
    Ok(ok(stats))
}

/// Recent activity: everyone's for admins, the caller's own otherwise.
pub async fn activity(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    Query(query): Query<LimitQuery>,
) -> ApiResult {
    let user_filter = (!caller.is_admin()).then_some(caller.user_id.as_str());
    let entries = activity_repo::list_recent(&state.db, user_filter, query.limit_or(10))?;
    Ok(ok(entries))
}

pub async fn recent_jobs(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    Query(query): Query<LimitQuery>,
) -> ApiResult {
    let (jobs, _) = job_repo::query(
        &state.db,
        &JobFilter {
            user_id: Some(caller.user_id),
            limit: Some(query.limit_or(5)),
            ..JobFilter::default()
        },
    )?;
    let views: Vec<JobStatusView> = jobs.iter().map(JobStatusView::from).collect();
    Ok(ok(views))
}
