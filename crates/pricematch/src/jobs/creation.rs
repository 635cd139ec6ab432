//! Turning an uploaded workbook into a pending job with stored batches.

use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::db::job_repo::{self, JobRow};
use crate::db::{new_id, now_millis, Database};
use crate::error::{DatabaseError, JobError};
use crate::matching::MatchingMethod;
use crate::spreadsheet::{extract_items, read_workbook, BoqLineItem, SheetItems};
use crate::storage::ObjectStore;

use super::JobStatus;

/// Maximum number of line items handled by one dispatch.
pub const BATCH_SIZE: usize = 10;

/// An uploaded BOQ workbook and the form fields sent with it.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub user_id: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub matching_method: MatchingMethod,
    pub client_id: Option<String>,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetSummary {
    pub name: String,
    pub item_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub job_id: String,
    pub file_name: String,
    pub item_count: usize,
    pub sheets: Vec<SheetSummary>,
}

/// Splits each sheet's items into batches of at most [`BATCH_SIZE`].
///
/// Batches never span two sheets. Every item gets its position across the
/// whole job as `batch_index`.
pub fn plan_batches(sheets: Vec<SheetItems>) -> Vec<Vec<BoqLineItem>> {
    let mut batches = Vec::new();
    let mut next_index = 0;
    for sheet in sheets {
        let mut items = sheet.items;
        for item in &mut items {
            item.batch_index = next_index;
            next_index += 1;
        }
        let mut items = items.into_iter().peekable();
        while items.peek().is_some() {
            batches.push(items.by_ref().take(BATCH_SIZE).collect());
        }
    }
    batches
}

/// Parses the workbook, stores the original file and records a pending job
/// with all of its batches.
pub async fn create_job_from_upload(
    db: &Database,
    store: &dyn ObjectStore,
    upload: NewUpload,
) -> Result<UploadSummary, JobError> {
    let span = info_span!("create_job", user_id = %upload.user_id, file = %upload.file_name);
    async move {
        let workbook = read_workbook(&upload.bytes)?;
        let sheets: Vec<SheetItems> = extract_items(&workbook)
            .into_iter()
            .filter(|s| !s.items.is_empty())
            .collect();
        if sheets.is_empty() {
            return Err(JobError::NoItems);
        }

        let summaries: Vec<SheetSummary> = sheets
            .iter()
            .map(|s| SheetSummary {
                name: s.name.clone(),
                item_count: s.items.len(),
            })
            .collect();
        let item_count: usize = summaries.iter().map(|s| s.item_count).sum();

        let batches = plan_batches(sheets)
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| DatabaseError::Json {
                column: "items",
                source,
            })?;

        let stored = store
            .upload_boq_file(&upload.user_id, &upload.file_name, upload.bytes)
            .await?;

        let now = now_millis();
        let job = JobRow {
            id: new_id(),
            user_id: upload.user_id,
            client_id: upload.client_id,
            project_id: upload.project_id,
            project_name: upload.project_name,
            file_name: upload.file_name,
            status: JobStatus::Pending.to_string(),
            item_count: item_count as i64,
            processed_count: 0,
            matched_count: 0,
            matching_method: upload.matching_method.to_string(),
            original_file_url: Some(stored.url),
            result_file_url: None,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            claimed_until: None,
        };
        job_repo::insert_with_batches(db, &job, &batches)?;

        info!(
            job_id = %job.id,
            items = item_count,
            batches = batches.len(),
            "Created matching job"
        );

        Ok(UploadSummary {
            job_id: job.id,
            file_name: job.file_name,
            item_count,
            sheets: summaries,
        })
    }
    .instrument(span)
    .await
}
