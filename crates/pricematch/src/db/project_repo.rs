//! Project repository. Jobs reference projects through `project_id`.

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

pub const PROJECT_STATUSES: [&str; 4] = ["draft", "active", "completed", "cancelled"];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRow {
    pub id: String,
    pub name: String,
    pub client_id: Option<String>,
    pub client_name: Option<String>,
    pub description: Option<String>,
    pub status: String,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub job_count: i64,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            client_id: row.get("client_id")?,
            client_name: row.get("client_name")?,
            description: row.get("description")?,
            status: row.get("status")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            job_count: row.get("job_count")?,
        })
    }
}

const SELECT_PROJECT: &str = "SELECT p.*, c.name AS client_name,
    (SELECT COUNT(*) FROM matching_jobs j WHERE j.project_id = p.id) AS job_count
    FROM projects p LEFT JOIN clients c ON c.id = p.client_id";

pub fn insert(db: &Database, project: &ProjectRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO projects (id, name, client_id, description, status, created_by,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                project.id,
                project.name,
                project.client_id,
                project.description,
                project.status,
                project.created_by,
                project.created_at,
                project.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ProjectRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                &format!("{} WHERE p.id = ?1", SELECT_PROJECT),
                params![id],
                ProjectRow::from_row,
            )
            .optional()?)
    })
}

/// Lists projects newest first, optionally for one client.
pub fn list(db: &Database, client_id: Option<&str>) -> Result<Vec<ProjectRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "{} WHERE (?1 IS NULL OR p.client_id = ?1) ORDER BY p.created_at DESC",
            SELECT_PROJECT
        ))?;
        let rows = stmt
            .query_map(params![client_id], ProjectRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM projects", [], |r| r.get(0))?))
}
