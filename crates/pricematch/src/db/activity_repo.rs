//! Append-only activity log.

use rusqlite::{params, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLogRow {
    pub id: i64,
    pub user_id: String,
    /// Joined from `users`; `None` if the user no longer exists.
    pub user_name: Option<String>,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub timestamp: i64,
}

impl ActivityLogRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            user_name: row.get("user_name")?,
            action: row.get("action")?,
            entity_type: row.get("entity_type")?,
            entity_id: row.get("entity_id")?,
            details: row.get("details")?,
            ip_address: row.get("ip_address")?,
            user_agent: row.get("user_agent")?,
            timestamp: row.get("timestamp")?,
        })
    }
}

/// A new activity entry.
#[derive(Debug, Clone, Default)]
pub struct NewActivity {
    pub user_id: String,
    pub action: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub details: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl NewActivity {
    pub fn new(user_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            action: action.into(),
            ..Default::default()
        }
    }

    pub fn entity(mut self, entity_type: &str, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

pub fn insert(db: &Database, entry: &NewActivity, timestamp: i64) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO activity_logs (user_id, action, entity_type, entity_id, details,
             ip_address, user_agent, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.user_id,
                entry.action,
                entry.entity_type,
                entry.entity_id,
                entry.details,
                entry.ip_address,
                entry.user_agent,
                timestamp,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Lists the most recent entries, optionally for one user.
pub fn list_recent(
    db: &Database,
    user_id: Option<&str>,
    limit: u64,
) -> Result<Vec<ActivityLogRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT a.*, u.name AS user_name FROM activity_logs a
             LEFT JOIN users u ON u.id = a.user_id
             WHERE (?1 IS NULL OR a.user_id = ?1)
             ORDER BY a.timestamp DESC, a.id DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], ActivityLogRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_since(db: &Database, user_id: Option<&str>, since: i64) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM activity_logs
             WHERE timestamp >= ?2 AND (?1 IS NULL OR user_id = ?1)",
            params![user_id, since],
            |r| r.get(0),
        )?)
    })
}
