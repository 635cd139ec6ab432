//! Project routes

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use pricematch::db::activity_repo::{self, NewActivity};
use pricematch::db::job_repo::{self, JobFilter};
use pricematch::db::project_repo::{self, ProjectRow, PROJECT_STATUSES};
use pricematch::db::{client_repo, new_id, now_millis};
use pricematch::jobs::JobStatusView;

use super::price_matching::owned_job;
use super::{created, message, ok, ApiResult};
use crate::error::ApiError;
use crate::extract::{ApiJson, ClientInfo, CurrentUser};
use crate::state::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_projects).post(create_project))
        .route("/:projectId/jobs", get(project_jobs))
        .route("/jobs/:jobId/link", post(link_job).delete(unlink_job))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectQuery {
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: Option<String>,
    pub client_id: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkJobRequest {
    pub project_id: Option<String>,
}

pub async fn list_projects(
    State(state): State<SharedState>,
    CurrentUser(_): CurrentUser,
    Query(query): Query<ProjectQuery>,
) -> ApiResult {
    let projects = project_repo::list(&state.db, query.client_id.as_deref())?;
    Ok(ok(projects))
}

pub async fn create_project(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    client: ClientInfo,
    ApiJson(req): ApiJson<CreateProjectRequest>,
) -> ApiResult {
    let Some(name) = req.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) else {
        return Err(ApiError::bad_request("Project name is required"));
    };
    let status = req.status.unwrap_or_else(|| "active".to_string());
    if !PROJECT_STATUSES.contains(&status.as_str()) {
        return Err(ApiError::bad_request(format!(
            "Invalid status. Expected one of: {}",
            PROJECT_STATUSES.join(", ")
        )));
    }
    if let Some(client_id) = &req.client_id {
        if client_repo::find_by_id(&state.db, client_id)?.is_none() {
            return Err(ApiError::bad_request("Client not found"));
        }
    }

    let now = now_millis();
    let project = ProjectRow {
        id: new_id(),
        name,
        client_id: req.client_id,
        client_name: None,
        description: req.description,
        status,
        created_by: caller.user_id.clone(),
        created_at: now,
        updated_at: now,
        job_count: 0,
    };
    project_repo::insert(&state.db, &project)?;
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&caller.user_id, "created_project")
                .entity("projects", &project.id)
                .details(format!("Created project: {}", project.name)),
        ),
        now,
    )?;

    let stored = project_repo::find_by_id(&state.db, &project.id)?.unwrap_or(project);
    Ok(created(stored))
}

pub async fn project_jobs(
    State(state): State<SharedState>,
    CurrentUser(_): CurrentUser,
    Path(project_id): Path<String>,
) -> ApiResult {
    if project_repo::find_by_id(&state.db, &project_id)?.is_none() {
        return Err(ApiError::not_found("Project not found"));
    }
    let (jobs, _) = job_repo::query(
        &state.db,
        &JobFilter {
            project_id: Some(project_id),
            ..JobFilter::default()
        },
    )?;
    let views: Vec<JobStatusView> = jobs.iter().map(JobStatusView::from).collect();
    Ok(ok(views))
}

pub async fn link_job(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    client: ClientInfo,
    Path(job_id): Path<String>,
    ApiJson(req): ApiJson<LinkJobRequest>,
) -> ApiResult {
    let Some(project_id) = req.project_id.filter(|p| !p.trim().is_empty()) else {
        return Err(ApiError::bad_request("Project ID is required"));
    };
    let job = owned_job(&state, &caller, &job_id)?;
    let project = project_repo::find_by_id(&state.db, &project_id)?
        .ok_or_else(|| ApiError::not_found("Project not found"))?;

    let now = now_millis();
    job_repo::set_project(&state.db, &job.id, Some(&project.id), Some(&project.name), now)?;
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&caller.user_id, "linked_job_to_project")
                .entity("aiMatchingJobs", &job.id)
                .details(format!("Linked job to project: {}", project.name)),
        ),
        now,
    )?;

    Ok(message("Job linked to project"))
}

pub async fn unlink_job(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    client: ClientInfo,
    Path(job_id): Path<String>,
) -> ApiResult {
    let job = owned_job(&state, &caller, &job_id)?;
    let now = now_millis();
    job_repo::set_project(&state.db, &job.id, None, None, now)?;
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&caller.user_id, "unlinked_job_from_project")
                .entity("aiMatchingJobs", &job.id),
        ),
        now,
    )?;

    Ok(message("Job unlinked from project"))
}
