//! Job batch repository. Each batch holds a JSON list of line items.
//!
//! A batch is taken with a short lease before matching and finished together
//! with its results, so two workers never match the same batch.

use rusqlite::{params, OptionalExtension, Row};

use super::result_repo::{self, MatchResultRow};
use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct JobBatchRow {
    pub id: i64,
    pub job_id: String,
    pub seq: i64,
    pub items: String,
    pub processed: bool,
    pub claimed_until: Option<i64>,
}

impl JobBatchRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            seq: row.get("seq")?,
            items: row.get("items")?,
            processed: row.get("processed")?,
            claimed_until: row.get("claimed_until")?,
        })
    }
}

/// Leases the lowest-numbered unprocessed batch that nobody else holds.
///
/// An expired lease counts as free, so a batch abandoned by a crashed worker
/// is picked up again.
pub fn claim_next(
    db: &Database,
    job_id: &str,
    now: i64,
    lease_until: i64,
) -> Result<Option<JobBatchRow>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let candidate = tx
            .query_row(
                "SELECT * FROM job_batches
                 WHERE job_id = ?1 AND processed = 0
                 AND (claimed_until IS NULL OR claimed_until <= ?2)
                 ORDER BY seq ASC LIMIT 1",
                params![job_id, now],
                JobBatchRow::from_row,
            )
            .optional()?;
        let Some(mut batch) = candidate else {
            return Ok(None);
        };

        let changed = tx.execute(
            "UPDATE job_batches SET claimed_until = ?3
             WHERE id = ?1 AND processed = 0
             AND (claimed_until IS NULL OR claimed_until <= ?2)",
            params![batch.id, now, lease_until],
        )?;
        tx.commit()?;
        if changed == 0 {
            return Ok(None);
        }
        batch.claimed_until = Some(lease_until);
        Ok(Some(batch))
    })
}

/// Stores a batch's results and marks it processed in one transaction.
///
/// Returns false, storing nothing, when the batch was already finished by
/// another worker.
pub fn finish(
    db: &Database,
    batch_id: i64,
    results: &[MatchResultRow],
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let changed = tx.execute(
            "UPDATE job_batches SET processed = 1, claimed_until = NULL
             WHERE id = ?1 AND processed = 0",
            params![batch_id],
        )?;
        if changed == 0 {
            return Ok(false);
        }
        for result in results {
            result_repo::insert_on(&tx, result)?;
        }
        tx.commit()?;
        Ok(true)
    })
}

/// Drops a batch lease early, e.g. after a failed match run.
pub fn release(db: &Database, batch_id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE job_batches SET claimed_until = NULL WHERE id = ?1 AND processed = 0",
            params![batch_id],
        )?;
        Ok(())
    })
}

pub fn count_remaining(db: &Database, job_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM job_batches WHERE job_id = ?1 AND processed = 0",
            params![job_id],
            |r| r.get(0),
        )?)
    })
}
