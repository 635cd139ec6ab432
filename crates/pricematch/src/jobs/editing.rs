//! Changes made to a job after matching: result corrections and deletion.

use serde::Deserialize;
use tracing::{info, warn};

use crate::db::job_repo::{self, JobRow};
use crate::db::result_repo::{self, MatchResultRow};
use crate::db::{now_millis, price_item_repo, Database};
use crate::error::JobError;
use crate::matching::line_total;
use crate::storage::ObjectStore;

/// Method recorded on results a user matched by hand.
pub const MANUAL_METHOD: &str = "MANUAL";

/// A user's edit to one match result. Absent fields are left unchanged.
///
/// `matched_item_id` copies that price item onto the result; the other
/// match fields then override individual columns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultCorrection {
    pub matched_item_id: Option<String>,
    pub matched_description: Option<String>,
    pub matched_code: Option<String>,
    pub matched_unit: Option<String>,
    pub matched_rate: Option<f64>,
    pub confidence: Option<f64>,
    pub notes: Option<String>,
}

impl ResultCorrection {
    fn changes_match(&self) -> bool {
        self.matched_item_id.is_some()
            || self.matched_description.is_some()
            || self.matched_code.is_some()
            || self.matched_unit.is_some()
            || self.matched_rate.is_some()
    }

    fn is_empty(&self) -> bool {
        !self.changes_match() && self.confidence.is_none() && self.notes.is_none()
    }
}

fn non_empty(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// Applies a correction to a stored result and recounts the job's matches.
///
/// Changing the match marks the result as manually edited, clears any match
/// error and recomputes the line total. Unless given, confidence becomes
/// 1.0 for a hand-picked match.
pub fn correct_result(
    db: &Database,
    result: MatchResultRow,
    correction: &ResultCorrection,
) -> Result<MatchResultRow, JobError> {
    if correction.is_empty() {
        return Err(JobError::InvalidCorrection("nothing to update".to_string()));
    }
    let mut updated = result;

    if let Some(item_id) = &correction.matched_item_id {
        let item = price_item_repo::find_by_id(db, item_id)?.ok_or_else(|| {
            JobError::InvalidCorrection(format!("unknown price item '{}'", item_id))
        })?;
        updated.matched_item_id = Some(item.id);
        updated.matched_description = Some(item.description);
        updated.matched_code = item.code;
        updated.matched_unit = item.unit;
        updated.matched_rate = Some(item.rate);
    }
    if let Some(description) = &correction.matched_description {
        updated.matched_description = non_empty(description);
    }
    if let Some(code) = &correction.matched_code {
        updated.matched_code = non_empty(code);
    }
    if let Some(unit) = &correction.matched_unit {
        updated.matched_unit = non_empty(unit);
    }
    if let Some(rate) = correction.matched_rate {
        if !rate.is_finite() || rate < 0.0 {
            return Err(JobError::InvalidCorrection(format!("invalid rate {}", rate)));
        }
        updated.matched_rate = Some(rate);
    }

    match correction.confidence {
        Some(confidence) if !(0.0..=1.0).contains(&confidence) => {
            return Err(JobError::InvalidCorrection(format!(
                "confidence {} is outside 0 to 1",
                confidence
            )));
        }
        Some(confidence) => updated.confidence = confidence,
        None if correction.changes_match() => updated.confidence = 1.0,
        None => {}
    }
    if let Some(notes) = &correction.notes {
        updated.notes = non_empty(notes);
    }

    if correction.changes_match() {
        updated.method = MANUAL_METHOD.to_string();
        updated.error = None;
        updated.total_price = updated
            .matched_rate
            .map(|rate| line_total(rate, updated.original_quantity.unwrap_or(0.0)));
    }
    if correction.changes_match() || correction.confidence.is_some() {
        updated.is_manually_edited = true;
    }

    if !result_repo::update_match(db, &updated)? {
        return Err(JobError::ResultNotFound(updated.id));
    }
    job_repo::refresh_matched_count(db, &updated.job_id, now_millis())?;
    info!(result_id = %updated.id, job_id = %updated.job_id, "Match result corrected");
    Ok(updated)
}

/// Deletes a job with its batches and results, then its stored files.
///
/// File removal is best effort: a storage failure is logged and the job
/// stays deleted. Returns false if the job did not exist.
pub async fn delete_job(
    db: &Database,
    store: &dyn ObjectStore,
    job: &JobRow,
) -> Result<bool, JobError> {
    if !job_repo::delete(db, &job.id)? {
        return Ok(false);
    }
    let files = [&job.original_file_url, &job.result_file_url];
    for url in files.into_iter().flatten() {
        if let Err(e) = store.delete(url).await {
            warn!(job_id = %job.id, error = %e, "Failed to delete stored job file");
        }
    }
    info!(job_id = %job.id, "Job deleted");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo::tests::pending_job;
    use crate::db::result_repo::tests::result;
    use crate::db::test_support::seed_user;
    use crate::jobs::creation::tests::boq_workbook;
    use crate::jobs::{create_job_from_upload, NewUpload};
    use crate::matching::tests::price_item;
    use crate::matching::MatchingMethod;
    use crate::storage::FilesystemStore;

    /// A completed job holding one confident and one failed result.
    fn completed_job(db: &Database) -> (String, MatchResultRow, MatchResultRow) {
        let user = seed_user(db, "editing@example.com");
        let job = pending_job(&user, 2);
        job_repo::insert_with_batches(db, &job, &[]).unwrap();
        let good = result(&job.id, 0, 0.9);
        let failed = MatchResultRow {
            matched_item_id: None,
            matched_description: Some("ERROR: Failed to match".to_string()),
            matched_rate: Some(0.0),
            confidence: 0.0,
            total_price: None,
            error: Some("no match".to_string()),
            ..result(&job.id, 1, 0.0)
        };
        result_repo::insert(db, &good).unwrap();
        result_repo::insert(db, &failed).unwrap();
        job_repo::complete(db, &job.id, now_millis()).unwrap();
        (job.id, good, failed)
    }

    #[test]
    fn test_picking_price_item_fixes_failed_result() {
        let db = Database::open_in_memory().unwrap();
        price_item_repo::insert(&db, &price_item("p9", "Hand excavation", "m3", 32.0)).unwrap();
        let (job_id, _, failed) = completed_job(&db);
        assert_eq!(job_repo::find_by_id(&db, &job_id).unwrap().unwrap().matched_count, 1);

        let correction = ResultCorrection {
            matched_item_id: Some("p9".to_string()),
            notes: Some("  checked on site ".to_string()),
            ..ResultCorrection::default()
        };
        let updated = correct_result(&db, failed, &correction).unwrap();
        assert_eq!(updated.matched_description.as_deref(), Some("Hand excavation"));
        assert_eq!(updated.matched_code.as_deref(), Some("C-p9"));
        assert_eq!(updated.total_price, Some(320.0));
        assert_eq!(updated.confidence, 1.0);
        assert_eq!(updated.method, MANUAL_METHOD);
        assert_eq!(updated.notes.as_deref(), Some("checked on site"));
        assert!(updated.error.is_none());
        assert!(updated.is_manually_edited);

        let stored = result_repo::find_by_id(&db, &updated.id).unwrap().unwrap();
        assert_eq!(stored, updated);
        assert_eq!(job_repo::find_by_id(&db, &job_id).unwrap().unwrap().matched_count, 2);
    }

    #[test]
    fn test_explicit_fields_override_and_notes_alone_keep_match() {
        let db = Database::open_in_memory().unwrap();
        let (_, good, _) = completed_job(&db);

        let notes_only = ResultCorrection {
            notes: Some("rate agreed".to_string()),
            ..ResultCorrection::default()
        };
        let noted = correct_result(&db, good, &notes_only).unwrap();
        assert_eq!(noted.method, "LOCAL");
        assert_eq!(noted.confidence, 0.9);
        assert!(!noted.is_manually_edited);

        let rate = ResultCorrection {
            matched_rate: Some(27.5),
            confidence: Some(0.8),
            ..ResultCorrection::default()
        };
        let repriced = correct_result(&db, noted, &rate).unwrap();
        assert_eq!(repriced.matched_rate, Some(27.5));
        assert_eq!(repriced.total_price, Some(275.0));
        assert_eq!(repriced.confidence, 0.8);
        assert_eq!(repriced.matched_description.as_deref(), Some("Excavation to trenches"));
        assert_eq!(repriced.notes.as_deref(), Some("rate agreed"));
    }

    #[test]
    fn test_invalid_corrections_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        let (_, good, _) = completed_job(&db);

        for correction in [
            ResultCorrection::default(),
            ResultCorrection {
                matched_item_id: Some("missing".to_string()),
                ..ResultCorrection::default()
            },
            ResultCorrection {
                matched_rate: Some(-1.0),
                ..ResultCorrection::default()
            },
            ResultCorrection {
                confidence: Some(1.5),
                ..ResultCorrection::default()
            },
        ] {
            assert!(matches!(
                correct_result(&db, good.clone(), &correction),
                Err(JobError::InvalidCorrection(_))
            ));
        }
        assert_eq!(result_repo::find_by_id(&db, &good.id).unwrap().unwrap(), good);
    }

    #[tokio::test]
    async fn test_delete_job_removes_rows_and_files() {
        let db = Database::open_in_memory().unwrap();
        let user = seed_user(&db, "delete@example.com");
        let dir = tempfile::TempDir::new().unwrap();
        let store = FilesystemStore::new(dir.path());
        let summary = create_job_from_upload(
            &db,
            &store,
            NewUpload {
                user_id: user,
                file_name: "boq.xlsx".to_string(),
                bytes: boq_workbook(&[("Bill 1", 3)]),
                matching_method: MatchingMethod::Local,
                client_id: None,
                project_id: None,
                project_name: None,
            },
        )
        .await
        .unwrap();
        let job = job_repo::find_by_id(&db, &summary.job_id).unwrap().unwrap();
        assert_eq!(store.list("boq-files").await.unwrap().len(), 1);

        assert!(delete_job(&db, &store, &job).await.unwrap());
        assert!(job_repo::find_by_id(&db, &job.id).unwrap().is_none());
        assert!(store.list("boq-files").await.unwrap().is_empty());
        assert!(!delete_job(&db, &store, &job).await.unwrap());
    }
}
