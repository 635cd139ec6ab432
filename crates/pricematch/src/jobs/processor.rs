//! Processing one batch of a matching job per dispatch.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::db::batch_repo::{self, JobBatchRow};
use crate::db::job_repo::{self, JobRow};
use crate::db::result_repo::{self, MatchResultRow};
use crate::db::{new_id, now_millis, Database};
use crate::error::JobError;
use crate::matching::{MatchOutcome, MatchingMethod, PriceCatalogue, PriceMatcher};
use crate::spreadsheet::BoqLineItem;

use super::JobStatus;

/// Description stored for items the matcher could not place.
pub const FAILED_MATCH_DESCRIPTION: &str = "ERROR: Failed to match";

/// How long a worker may hold a batch before another may take it over.
pub const BATCH_LEASE_MS: i64 = 300_000;

/// What one dispatch achieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub message: &'static str,
    pub has_more: bool,
    /// Items matched by this dispatch.
    pub processed_count: usize,
}

impl BatchOutcome {
    fn batch_processed(processed_count: usize) -> Self {
        Self {
            message: "Batch processed",
            has_more: true,
            processed_count,
        }
    }

    fn job_completed(processed_count: usize) -> Self {
        Self {
            message: "Job completed",
            has_more: false,
            processed_count,
        }
    }

    /// Another worker holds or already finished the batch; that worker
    /// reports progress, so this one asks for nothing more.
    fn in_progress() -> Self {
        Self {
            message: "Batch already in progress",
            has_more: false,
            processed_count: 0,
        }
    }
}

/// Runs job batches against the active price list.
#[derive(Clone)]
pub struct JobProcessor {
    db: Database,
    catalogue: PriceCatalogue,
    matcher: Arc<dyn PriceMatcher>,
}

impl JobProcessor {
    pub fn new(db: Database, catalogue: PriceCatalogue, matcher: Arc<dyn PriceMatcher>) -> Self {
        Self {
            db,
            catalogue,
            matcher,
        }
    }

    /// Matches the lowest unprocessed batch of `job_id`.
    ///
    /// A pending job moves to processing first. The batch is leased before
    /// matching and its results are stored only if no other worker finished
    /// it meanwhile. When no batch is left the job is completed. Any error
    /// after the job was loaded fails the job.
    pub async fn process_next_batch(&self, job_id: &str) -> Result<BatchOutcome, JobError> {
        let span = info_span!("process_batch", job_id = %job_id);
        async move {
            let job = job_repo::find_by_id(&self.db, job_id)?
                .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
            let status: JobStatus = job.status.parse()?;
            if status != JobStatus::Processing {
                status.ensure_transition(JobStatus::Processing)?;
            }

            let result = self.run_batch(&job, status).await;
            if let Err(e) = &result {
                error!(error = %e, "Batch failed, failing job");
                if let Err(fail_err) = job_repo::fail(&self.db, &job.id, &e.to_string(), now_millis())
                {
                    error!(error = %fail_err, "Failed to record job failure");
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_batch(&self, job: &JobRow, status: JobStatus) -> Result<BatchOutcome, JobError> {
        if status == JobStatus::Pending && job_repo::mark_processing(&self.db, &job.id, now_millis())? {
            info!("Job started");
        }

        let now = now_millis();
        let Some(batch) = batch_repo::claim_next(&self.db, &job.id, now, now + BATCH_LEASE_MS)? else {
            if batch_repo::count_remaining(&self.db, &job.id)? > 0 {
                debug!("Remaining batches are leased by other workers");
                return Ok(BatchOutcome::in_progress());
            }
            self.complete(job)?;
            return Ok(BatchOutcome::job_completed(0));
        };

        let results = match self.match_batch(job, &batch).await {
            Ok(results) => results,
            Err(e) => {
                if let Err(release_err) = batch_repo::release(&self.db, batch.id) {
                    warn!(error = %release_err, "Failed to release batch lease");
                }
                return Err(e);
            }
        };

        if !batch_repo::finish(&self.db, batch.id, &results)? {
            warn!(batch = batch.seq, "Batch was finished by another worker, discarding results");
            return Ok(BatchOutcome::in_progress());
        }

        if batch_repo::count_remaining(&self.db, &job.id)? > 0 {
            Ok(BatchOutcome::batch_processed(results.len()))
        } else {
            self.complete(job)?;
            Ok(BatchOutcome::job_completed(results.len()))
        }
    }

    async fn match_batch(
        &self,
        job: &JobRow,
        batch: &JobBatchRow,
    ) -> Result<Vec<MatchResultRow>, JobError> {
        let method: MatchingMethod = job.matching_method.parse()?;
        let items: Vec<BoqLineItem> =
            serde_json::from_str(&batch.items).map_err(|e| JobError::CorruptBatch {
                batch_id: batch.id,
                reason: e.to_string(),
            })?;
        let catalogue = self.catalogue.active_items()?;
        debug!(
            batch = batch.seq,
            items = items.len(),
            catalogue = catalogue.len(),
            "Matching batch"
        );

        let mut results = Vec::with_capacity(items.len());
        for item in &items {
            let row = match self.matcher.match_item(item, method, &catalogue).await {
                Ok(outcome) => matched_result(&job.id, item, &outcome),
                Err(e) => {
                    warn!(batch_index = item.batch_index, error = %e, "Item match failed");
                    failed_result(&job.id, item, method, &e.to_string())
                }
            };
            results.push(row);
            job_repo::set_processed_count(
                &self.db,
                &job.id,
                item.batch_index as i64 + 1,
                now_millis(),
            )?;
        }
        Ok(results)
    }

    /// Matches a stored result's line item again with `method` and stores the
    /// new match in place of the old one.
    pub async fn rematch(
        &self,
        result: MatchResultRow,
        method: MatchingMethod,
    ) -> Result<MatchResultRow, JobError> {
        let item = BoqLineItem {
            batch_index: usize::try_from(result.batch_index).unwrap_or_default(),
            description: result.original_description.clone(),
            quantity: result.original_quantity.unwrap_or(0.0),
            unit: result.original_unit.clone(),
            context_headers: result.context_headers.clone(),
            row_number: usize::try_from(result.row_number).unwrap_or_default(),
            sheet_name: result.sheet_name.clone(),
        };
        let catalogue = self.catalogue.active_items()?;
        let outcome = self.matcher.match_item(&item, method, &catalogue).await?;

        let updated = MatchResultRow {
            id: result.id,
            notes: result.notes,
            created_at: result.created_at,
            ..matched_result(&result.job_id, &item, &outcome)
        };
        if !result_repo::update_match(&self.db, &updated)? {
            return Err(JobError::ResultNotFound(updated.id));
        }
        job_repo::refresh_matched_count(&self.db, &updated.job_id, now_millis())?;
        info!(
            result_id = %updated.id,
            method = %method,
            confidence = updated.confidence,
            "Result rematched"
        );
        Ok(updated)
    }

    fn complete(&self, job: &JobRow) -> Result<(), JobError> {
        if job_repo::complete(&self.db, &job.id, now_millis())? {
            info!(items = job.item_count, "Job completed");
        }
        Ok(())
    }
}

fn base_result(job_id: &str, item: &BoqLineItem, method: &str) -> MatchResultRow {
    MatchResultRow {
        id: new_id(),
        job_id: job_id.to_string(),
        batch_index: item.batch_index as i64,
        row_number: item.row_number as i64,
        sheet_name: item.sheet_name.clone(),
        original_description: item.description.clone(),
        original_quantity: Some(item.quantity),
        original_unit: item.unit.clone(),
        context_headers: item.context_headers.clone(),
        matched_item_id: None,
        matched_description: None,
        matched_code: None,
        matched_unit: None,
        matched_rate: None,
        confidence: 0.0,
        method: method.to_string(),
        total_price: None,
        error: None,
        notes: None,
        is_manually_edited: false,
        created_at: now_millis(),
    }
}

fn matched_result(job_id: &str, item: &BoqLineItem, outcome: &MatchOutcome) -> MatchResultRow {
    MatchResultRow {
        matched_item_id: Some(outcome.matched_item_id.clone()),
        matched_description: Some(outcome.matched_description.clone()),
        matched_code: outcome.matched_code.clone(),
        matched_unit: outcome.matched_unit.clone(),
        matched_rate: Some(outcome.matched_rate),
        confidence: outcome.confidence,
        total_price: Some(outcome.total_price(item.quantity)),
        ..base_result(job_id, item, outcome.method.as_str())
    }
}

fn failed_result(
    job_id: &str,
    item: &BoqLineItem,
    method: MatchingMethod,
    error: &str,
) -> MatchResultRow {
    MatchResultRow {
        matched_description: Some(FAILED_MATCH_DESCRIPTION.to_string()),
        matched_rate: Some(0.0),
        error: Some(error.to_string()),
        ..base_result(job_id, item, method.as_str())
    }
}
