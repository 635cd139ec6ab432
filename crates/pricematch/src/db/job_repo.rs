//! Matching job repository: CRUD and state transitions for `matching_jobs`.
//!
//! Transition statements are guarded in SQL so terminal jobs are never
//! modified, regardless of how many workers race on the same row.

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

/// Confidence above which a result counts as matched.
pub const MATCHED_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRow {
    pub id: String,
    pub user_id: String,
    pub client_id: Option<String>,
    pub project_id: Option<String>,
    pub project_name: Option<String>,
    pub file_name: String,
    pub status: String,
    pub item_count: i64,
    pub processed_count: i64,
    pub matched_count: i64,
    pub matching_method: String,
    pub original_file_url: Option<String>,
    pub result_file_url: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub updated_at: i64,
    #[serde(skip_serializing)]
    pub claimed_until: Option<i64>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            client_id: row.get("client_id")?,
            project_id: row.get("project_id")?,
            project_name: row.get("project_name")?,
            file_name: row.get("file_name")?,
            status: row.get("status")?,
            item_count: row.get("item_count")?,
            processed_count: row.get("processed_count")?,
            matched_count: row.get("matched_count")?,
            matching_method: row.get("matching_method")?,
            original_file_url: row.get("original_file_url")?,
            result_file_url: row.get("result_file_url")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            updated_at: row.get("updated_at")?,
            claimed_until: row.get("claimed_until")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Per-status job counts.
#[derive(Debug, Default, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl JobStatusCounts {
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Inserts a job and its item batches in one transaction.
pub fn insert_with_batches(
    db: &Database,
    job: &JobRow,
    batches: &[String],
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO matching_jobs (id, user_id, client_id, project_id, project_name,
             file_name, status, item_count, processed_count, matched_count, matching_method,
             original_file_url, result_file_url, error, created_at, started_at, completed_at,
             updated_at, claimed_until)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19)",
            params![
                job.id,
                job.user_id,
                job.client_id,
                job.project_id,
                job.project_name,
                job.file_name,
                job.status,
                job.item_count,
                job.processed_count,
                job.matched_count,
                job.matching_method,
                job.original_file_url,
                job.result_file_url,
                job.error,
                job.created_at,
                job.started_at,
                job.completed_at,
                job.updated_at,
                job.claimed_until,
            ],
        )?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO job_batches (job_id, seq, items) VALUES (?1, ?2, ?3)")?;
            for (seq, items) in batches.iter().enumerate() {
                stmt.execute(params![job.id, seq as i64, items])?;
            }
        }
        tx.commit()?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM matching_jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?)
    })
}

/// Queries jobs with filters, newest first, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref user_id) = filter.user_id {
            conditions.push(format!("user_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(user_id.clone()));
        }
        if let Some(ref project_id) = filter.project_id {
            conditions.push(format!("project_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(project_id.clone()));
        }
        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM matching_jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = i64::try_from(filter.limit.unwrap_or(100)).unwrap_or(i64::MAX);
        let offset = i64::try_from(filter.offset.unwrap_or(0)).unwrap_or(i64::MAX);
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM matching_jobs {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Returns up to `limit` jobs that are still pending or processing, oldest first.
pub fn find_unfinished(db: &Database, limit: usize) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM matching_jobs WHERE status IN ('pending', 'processing')
             ORDER BY created_at ASC, id ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Takes a lease on an unfinished job until `lease_until`.
///
/// Succeeds only if no unexpired lease exists, so at most one caller holds
/// the job at a time.
pub fn try_claim(db: &Database, id: &str, now: i64, lease_until: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE matching_jobs SET claimed_until = ?3
             WHERE id = ?1 AND status IN ('pending', 'processing')
             AND (claimed_until IS NULL OR claimed_until <= ?2)",
            params![id, now, lease_until],
        )?;
        Ok(changed > 0)
    })
}

/// Drops the lease taken by [`try_claim`] with the same `lease_until`.
///
/// A lease that has since been taken over by another caller is left alone.
pub fn release_claim(db: &Database, id: &str, lease_until: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE matching_jobs SET claimed_until = NULL WHERE id = ?1 AND claimed_until = ?2",
            params![id, lease_until],
        )?;
        Ok(changed > 0)
    })
}

/// Moves a pending job to processing. Returns false if it was not pending.
pub fn mark_processing(db: &Database, id: &str, now: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE matching_jobs SET status = 'processing', started_at = ?2, updated_at = ?2
             WHERE id = ?1 AND status = 'pending'",
            params![id, now],
        )?;
        Ok(changed > 0)
    })
}

pub fn set_processed_count(
    db: &Database,
    id: &str,
    processed_count: i64,
    now: i64,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE matching_jobs SET processed_count = MAX(processed_count, ?2), updated_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id, processed_count, now],
        )?;
        Ok(())
    })
}

/// Completes an unfinished job, counting results above [`MATCHED_CONFIDENCE`].
///
/// Returns false if the job was already terminal.
pub fn complete(db: &Database, id: &str, now: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE matching_jobs SET status = 'completed', completed_at = ?2, updated_at = ?2,
             processed_count = item_count,
             matched_count = (SELECT COUNT(*) FROM match_results
                              WHERE job_id = ?1 AND confidence > ?3)
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id, now, MATCHED_CONFIDENCE],
        )?;
        Ok(changed > 0)
    })
}

/// Recounts matched results of a completed job after a result was edited.
pub fn refresh_matched_count(db: &Database, id: &str, now: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE matching_jobs SET updated_at = ?2,
             matched_count = (SELECT COUNT(*) FROM match_results
                              WHERE job_id = ?1 AND confidence > ?3)
             WHERE id = ?1 AND status = 'completed'",
            params![id, now, MATCHED_CONFIDENCE],
        )?;
        Ok(changed > 0)
    })
}

/// Deletes a job together with its batches and results.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM matching_jobs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

/// Fails an unfinished job. Returns false if the job was already terminal.
pub fn fail(db: &Database, id: &str, error: &str, now: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE matching_jobs SET status = 'failed', error = ?2, updated_at = ?3
             WHERE id = ?1 AND status IN ('pending', 'processing')",
            params![id, error, now],
        )?;
        Ok(changed > 0)
    })
}

pub fn set_original_file_url(db: &Database, id: &str, url: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE matching_jobs SET original_file_url = ?2 WHERE id = ?1",
            params![id, url],
        )?;
        Ok(())
    })
}

pub fn set_result_file_url(db: &Database, id: &str, url: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE matching_jobs SET result_file_url = ?2 WHERE id = ?1",
            params![id, url],
        )?;
        Ok(())
    })
}

/// Links a job to a project, or unlinks it when `project_id` is `None`.
pub fn set_project(
    db: &Database,
    id: &str,
    project_id: Option<&str>,
    project_name: Option<&str>,
    now: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE matching_jobs SET project_id = ?2, project_name = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, project_id, project_name, now],
        )?;
        Ok(changed > 0)
    })
}

/// Counts jobs per status, optionally for one user.
pub fn status_counts(db: &Database, user_id: Option<&str>) -> Result<JobStatusCounts, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM matching_jobs
             WHERE (?1 IS NULL OR user_id = ?1) GROUP BY status",
        )?;
        let mut counts = JobStatusCounts::default();
        let rows = stmt.query_map(params![user_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, u64>(1)?))
        })?;
        for row in rows {
            let (status, count) = row?;
            match status.as_str() {
                "pending" => counts.pending = count,
                "processing" => counts.processing = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                other => log::warn!("Ignoring unknown job status '{}' in counts", other),
            }
        }
        Ok(counts)
    })
}

/// Returns `(jobs_completed, items_matched)` for jobs completed at or after `since`.
pub fn completed_since(
    db: &Database,
    user_id: Option<&str>,
    since: i64,
) -> Result<(u64, u64), DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(matched_count), 0) FROM matching_jobs
             WHERE status = 'completed' AND completed_at >= ?2
             AND (?1 IS NULL OR user_id = ?1)",
            params![user_id, since],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?)
    })
}
