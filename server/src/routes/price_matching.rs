//! Upload, batch processing, status and download of matching jobs, plus
//! result corrections and job deletion.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::routing::{delete, get, patch, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use pricematch::db::activity_repo::{self, NewActivity};
use pricematch::db::job_repo::{self, JobFilter, JobRow};
use pricematch::db::result_repo::{self, MatchResultRow};
use pricematch::db::now_millis;
use pricematch::jobs::{
    correct_result, create_job_from_upload, delete_job, JobStatus, JobStatusView, NewUpload,
    ResultCorrection,
};
use pricematch::sanitize::safe_file_name;
use pricematch::spreadsheet::{build_results_workbook, is_workbook_file};
use pricematch::storage::XLSX_CONTENT_TYPE;
use pricematch::{AuthUser, JobError, MatchingMethod};

use super::{message, ok, page_offset, ApiResult};
use crate::error::ApiError;
use crate::extract::{ApiJson, ClientInfo, CronAuthorized, CurrentUser};
use crate::state::SharedState;

pub fn routes() -> Router<SharedState> {
    Router::new()
        .route("/upload", post(upload))
        .route("/process-job", post(process_job))
        .route("/status/:jobId", get(status))
        .route("/download/:jobId", get(download))
        .route("/jobs", get(list_jobs))
        .route("/:jobId/results", get(results))
        .route("/:jobId", delete(remove_job))
        .route("/results/:resultId", patch(update_result))
        .route("/results/:resultId/rematch", post(rematch_result))
}

/// Loads a job visible to `caller`. Other users' jobs read as missing.
pub(crate) fn owned_job(
    state: &SharedState,
    caller: &AuthUser,
    job_id: &str,
) -> Result<JobRow, ApiError> {
    match job_repo::find_by_id(&state.db, job_id)? {
        Some(job) if job.user_id == caller.user_id => Ok(job),
        _ => Err(ApiError::not_found("Job not found")),
    }
}

/// Loads a match result whose job belongs to `caller`, with that job.
fn owned_result(
    state: &SharedState,
    caller: &AuthUser,
    result_id: &str,
) -> Result<(MatchResultRow, JobRow), ApiError> {
    let not_found = || ApiError::not_found("Result not found");
    let result = result_repo::find_by_id(&state.db, result_id)?.ok_or_else(not_found)?;
    let job = owned_job(state, caller, &result.job_id).map_err(|_| not_found())?;
    Ok((result, job))
}

#[derive(Debug, Default)]
struct UploadForm {
    file_name: Option<String>,
    bytes: Vec<u8>,
    matching_method: Option<String>,
    client_id: Option<String>,
    project_id: Option<String>,
    project_name: Option<String>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let bad_form = |e: axum::extract::multipart::MultipartError| {
        ApiError::bad_request(format!("Invalid upload: {}", e.body_text()))
    };

    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await.map_err(bad_form)? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "file" {
            form.file_name = field.file_name().map(str::to_string);
            form.bytes = field.bytes().await.map_err(bad_form)?.to_vec();
            continue;
        }
        let value = field.text().await.map_err(bad_form)?;
        let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        match name.as_str() {
            "matchingMethod" => form.matching_method = value,
            "clientId" => form.client_id = value,
            "projectId" => form.project_id = value,
            "projectName" => form.project_name = value,
            _ => {}
        }
    }
    Ok(form)
}

pub async fn upload(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    client: ClientInfo,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult {
    let multipart = multipart.map_err(|_| ApiError::bad_request("No file uploaded"))?;
    let form = read_upload_form(multipart).await?;

    let Some(file_name) = form.file_name.filter(|_| !form.bytes.is_empty()) else {
        return Err(ApiError::bad_request("No file uploaded"));
    };
    if !is_workbook_file(&file_name) {
        return Err(ApiError::bad_request("Only Excel (.xlsx) files are supported"));
    }
    let matching_method = match form.matching_method {
        Some(method) => method.parse::<MatchingMethod>()?,
        None => MatchingMethod::default(),
    };

    let upload = NewUpload {
        user_id: caller.user_id.clone(),
        file_name,
        bytes: form.bytes,
        matching_method,
        client_id: form.client_id,
        project_id: form.project_id,
        project_name: form.project_name,
    };
    let summary = match create_job_from_upload(&state.db, state.store.as_ref(), upload).await {
        Ok(summary) => summary,
        Err(JobError::NoItems | JobError::Spreadsheet(_)) => {
            return Err(ApiError::bad_request("No valid data found in Excel file"))
        }
        Err(other) => return Err(ApiError::internal("Failed to process file", other)),
    };

    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&caller.user_id, "created_matching_job")
                .entity("aiMatchingJobs", &summary.job_id)
                .details(format!(
                    "Uploaded {} with {} items ({})",
                    summary.file_name, summary.item_count, matching_method
                )),
        ),
        now_millis(),
    )?;
    state.scheduler.trigger();

    Ok(ok(summary))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessJobRequest {
    pub job_id: Option<String>,
}

pub async fn process_job(
    State(state): State<SharedState>,
    _cron: CronAuthorized,
    ApiJson(req): ApiJson<ProcessJobRequest>,
) -> ApiResult {
    let Some(job_id) = req.job_id.filter(|id| !id.trim().is_empty()) else {
        return Err(ApiError::bad_request("Job ID is required"));
    };

    match state.processor.process_next_batch(&job_id).await {
        Ok(outcome) => {
            if outcome.has_more {
                state.scheduler.trigger();
            }
            Ok(ok(outcome))
        }
        Err(JobError::NotFound(_) | JobError::InvalidTransition { .. }) => Err(
            ApiError::bad_request("Job not found or not in processing state"),
        ),
        Err(other) => Err(ApiError::internal("Failed to process job", other)),
    }
}

pub async fn status(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    Path(job_id): Path<String>,
) -> ApiResult {
    let job = owned_job(&state, &caller, &job_id)?;
    Ok(ok(JobStatusView::from(&job)))
}

pub async fn download(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    Path(job_id): Path<String>,
) -> ApiResult {
    let job = owned_job(&state, &caller, &job_id)?;
    if job.status != JobStatus::Completed.as_str() {
        return Err(ApiError::bad_request("Job is not completed yet"));
    }
    let results = result_repo::list_for_job(&state.db, &job.id)?;
    if results.is_empty() {
        return Err(ApiError::not_found("No results found for this job"));
    }

    let original = match &job.original_file_url {
        Some(url) => match state.store.download(url).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Original file unavailable, exporting flat results");
                None
            }
        },
        None => None,
    };
    let workbook = build_results_workbook(original.as_deref(), &job, &results)
        .map_err(|e| ApiError::internal("Failed to generate results file", e))?;

    let stored = state
        .store
        .upload_results_file(&job.id, workbook.clone())
        .await
        .map_err(|e| ApiError::internal("Failed to store results file", e))?;
    job_repo::set_result_file_url(&state.db, &job.id, &stored.url)?;
    info!(job_id = %job.id, rows = results.len(), "Results exported");

    let disposition = format!(
        "attachment; filename=\"matched-{}\"",
        safe_file_name(&job.file_name)
    );
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|e| ApiError::internal("Failed to build download headers", e))?;
    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static(XLSX_CONTENT_TYPE)),
            (CONTENT_DISPOSITION, disposition),
        ],
        workbook,
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListQuery {
    pub status: Option<String>,
    pub project_id: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct JobPage {
    pub jobs: Vec<JobStatusView>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
}

pub async fn list_jobs(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    Query(query): Query<JobListQuery>,
) -> ApiResult {
    let status = query
        .status
        .map(|s| s.parse::<JobStatus>().map(|s| s.to_string()))
        .transpose()?;
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(20).clamp(1, 100);

    let (rows, total) = job_repo::query(
        &state.db,
        &JobFilter {
            user_id: Some(caller.user_id),
            project_id: query.project_id,
            status,
            limit: Some(limit),
            offset: Some(page_offset(page, limit)),
        },
    )?;
    Ok(ok(JobPage {
        jobs: rows.iter().map(JobStatusView::from).collect(),
        total,
        page,
        limit,
    }))
}

pub async fn results(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    Path(job_id): Path<String>,
) -> ApiResult {
    let job = owned_job(&state, &caller, &job_id)?;
    Ok(ok(result_repo::list_for_job(&state.db, &job.id)?))
}

pub async fn remove_job(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    client: ClientInfo,
    Path(job_id): Path<String>,
) -> ApiResult {
    let job = owned_job(&state, &caller, &job_id)?;
    if !delete_job(&state.db, state.store.as_ref(), &job).await? {
        return Err(ApiError::not_found("Job not found"));
    }
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&caller.user_id, "delete_job")
                .entity("aiMatchingJobs", &job.id)
                .details(format!("Deleted job for {}", job.file_name)),
        ),
        now_millis(),
    )?;
    Ok(message("Job deleted successfully"))
}

pub async fn update_result(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    client: ClientInfo,
    Path(result_id): Path<String>,
    ApiJson(correction): ApiJson<ResultCorrection>,
) -> ApiResult {
    let (result, _) = owned_result(&state, &caller, &result_id)?;
    let updated = correct_result(&state.db, result, &correction)?;
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&caller.user_id, "update_match")
                .entity("matchResults", &updated.id)
                .details("Updated match result"),
        ),
        now_millis(),
    )?;
    Ok(ok(updated))
}

#[derive(Debug, Default, Deserialize)]
pub struct RematchRequest {
    pub method: Option<String>,
}

/// Matches one result again, by default with its job's method.
pub async fn rematch_result(
    State(state): State<SharedState>,
    CurrentUser(caller): CurrentUser,
    client: ClientInfo,
    Path(result_id): Path<String>,
    body: Option<ApiJson<RematchRequest>>,
) -> ApiResult {
    let (result, job) = owned_result(&state, &caller, &result_id)?;
    let method = body
        .and_then(|ApiJson(req)| req.method)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(job.matching_method)
        .parse::<MatchingMethod>()?;

    let updated = state.processor.rematch(result, method).await?;
    activity_repo::insert(
        &state.db,
        &client.stamp(
            NewActivity::new(&caller.user_id, "run_match")
                .entity("matchResults", &updated.id)
                .details(format!("Rematched result with {}", method)),
        ),
        now_millis(),
    )?;
    Ok(ok(updated))
}
