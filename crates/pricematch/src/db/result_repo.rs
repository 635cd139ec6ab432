//! Match result repository.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchResultRow {
    pub id: String,
    pub job_id: String,
    /// Position of the line item across the whole job, starting at 0.
    pub batch_index: i64,
    pub row_number: i64,
    pub sheet_name: String,
    pub original_description: String,
    pub original_quantity: Option<f64>,
    pub original_unit: Option<String>,
    pub context_headers: Vec<String>,
    pub matched_item_id: Option<String>,
    pub matched_description: Option<String>,
    pub matched_code: Option<String>,
    pub matched_unit: Option<String>,
    pub matched_rate: Option<f64>,
    pub confidence: f64,
    pub method: String,
    pub total_price: Option<f64>,
    pub error: Option<String>,
    pub notes: Option<String>,
    /// Set once a user overrides the matcher's choice.
    pub is_manually_edited: bool,
    pub created_at: i64,
}

impl MatchResultRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let headers: String = row.get("context_headers")?;
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            batch_index: row.get("batch_index")?,
            row_number: row.get("row_num")?,
            sheet_name: row.get("sheet_name")?,
            original_description: row.get("original_description")?,
            original_quantity: row.get("original_quantity")?,
            original_unit: row.get("original_unit")?,
            context_headers: serde_json::from_str(&headers).unwrap_or_default(),
            matched_item_id: row.get("matched_item_id")?,
            matched_description: row.get("matched_description")?,
            matched_code: row.get("matched_code")?,
            matched_unit: row.get("matched_unit")?,
            matched_rate: row.get("matched_rate")?,
            confidence: row.get("confidence")?,
            method: row.get("method")?,
            total_price: row.get("total_price")?,
            error: row.get("error")?,
            notes: row.get("notes")?,
            is_manually_edited: row.get("is_manually_edited")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert(db: &Database, result: &MatchResultRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| insert_on(conn, result))
}

/// Inserts on an already locked connection, inside the caller's transaction.
pub(crate) fn insert_on(conn: &Connection, result: &MatchResultRow) -> Result<(), DatabaseError> {
    let headers = serde_json::to_string(&result.context_headers).map_err(|source| {
        DatabaseError::Json {
            column: "context_headers",
            source,
        }
    })?;

    conn.execute(
        "INSERT INTO match_results (id, job_id, batch_index, row_num, sheet_name,
         original_description, original_quantity, original_unit, context_headers,
         matched_item_id, matched_description, matched_code, matched_unit, matched_rate,
         confidence, method, total_price, error, notes, is_manually_edited, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
         ?17, ?18, ?19, ?20, ?21)",
        params![
            result.id,
            result.job_id,
            result.batch_index,
            result.row_number,
            result.sheet_name,
            result.original_description,
            result.original_quantity,
            result.original_unit,
            headers,
            result.matched_item_id,
            result.matched_description,
            result.matched_code,
            result.matched_unit,
            result.matched_rate,
            result.confidence,
            result.method,
            result.total_price,
            result.error,
            result.notes,
            result.is_manually_edited,
            result.created_at,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<MatchResultRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM match_results WHERE id = ?1",
                params![id],
                MatchResultRow::from_row,
            )
            .optional()?)
    })
}

/// Overwrites the match columns of a stored result. Returns false if it does
/// not exist.
pub fn update_match(db: &Database, result: &MatchResultRow) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE match_results SET matched_item_id=?2, matched_description=?3,
             matched_code=?4, matched_unit=?5, matched_rate=?6, confidence=?7, method=?8,
             total_price=?9, error=?10, notes=?11, is_manually_edited=?12
             WHERE id=?1",
            params![
                result.id,
                result.matched_item_id,
                result.matched_description,
                result.matched_code,
                result.matched_unit,
                result.matched_rate,
                result.confidence,
                result.method,
                result.total_price,
                result.error,
                result.notes,
                result.is_manually_edited,
            ],
        )?;
        Ok(changed > 0)
    })
}

/// Lists a job's results in line-item order.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<MatchResultRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM match_results WHERE job_id = ?1 ORDER BY batch_index ASC, rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![job_id], MatchResultRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns `(result_count, average_confidence)` over every stored result.
pub fn totals(db: &Database) -> Result<(u64, f64), DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*), COALESCE(AVG(confidence), 0.0) FROM match_results",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?)
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::job_repo::{self, tests::pending_job};
    use crate::db::test_support::seed_user;
    use crate::db::{new_id, now_millis};

    pub(crate) fn result(job_id: &str, batch_index: i64, confidence: f64) -> MatchResultRow {
        MatchResultRow {
            id: new_id(),
            job_id: job_id.to_string(),
            batch_index,
            row_number: batch_index + 2,
            sheet_name: "Bill 1".to_string(),
            original_description: "Excavate trench".to_string(),
            original_quantity: Some(10.0),
            original_unit: Some("m3".to_string()),
            context_headers: vec!["Substructure".to_string()],
            matched_item_id: Some("p1".to_string()),
            matched_description: Some("Excavation to trenches".to_string()),
            matched_code: Some("EX-01".to_string()),
            matched_unit: Some("m3".to_string()),
            matched_rate: Some(25.0),
            confidence,
            method: "LOCAL".to_string(),
            total_price: Some(250.0),
            error: None,
            notes: None,
            is_manually_edited: false,
            created_at: now_millis(),
        }
    }

    #[test]
    fn test_results_listed_in_item_order_and_counted_on_complete() {
        let db = Database::open_in_memory().unwrap();
        let user = seed_user(&db, "results@example.com");
        let job = pending_job(&user, 3);
        job_repo::insert_with_batches(&db, &job, &[]).unwrap();

        insert(&db, &result(&job.id, 2, 0.9)).unwrap();
        insert(&db, &result(&job.id, 0, 0.5)).unwrap();
        insert(&db, &result(&job.id, 1, 0.75)).unwrap();

        let rows = list_for_job(&db, &job.id).unwrap();
        let order: Vec<i64> = rows.iter().map(|r| r.batch_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(rows[0].context_headers, vec!["Substructure".to_string()]);

        job_repo::complete(&db, &job.id, now_millis()).unwrap();
        let done = job_repo::find_by_id(&db, &job.id).unwrap().unwrap();
        // 0.5 is not above the threshold.
        assert_eq!(done.matched_count, 2);

        let (count, avg) = totals(&db).unwrap();
        assert_eq!(count, 3);
        assert!((avg - (0.9 + 0.5 + 0.75) / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_update_match_overwrites_match_columns() {
        let db = Database::open_in_memory().unwrap();
        let user = seed_user(&db, "edit@example.com");
        let job = pending_job(&user, 1);
        job_repo::insert_with_batches(&db, &job, &[]).unwrap();
        let mut row = result(&job.id, 0, 0.4);
        insert(&db, &row).unwrap();

        row.matched_code = Some("EX-02".to_string());
        row.matched_rate = Some(30.0);
        row.total_price = Some(300.0);
        row.confidence = 1.0;
        row.notes = Some("Checked against drawings".to_string());
        row.is_manually_edited = true;
        assert!(update_match(&db, &row).unwrap());

        let stored = find_by_id(&db, &row.id).unwrap().unwrap();
        assert_eq!(stored, row);
        assert!(find_by_id(&db, "missing").unwrap().is_none());

        row.id = "missing".to_string();
        assert!(!update_match(&db, &row).unwrap());
    }
}
