//! Application settings key/value store.

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettingRow {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub updated_at: i64,
    pub updated_by: Option<String>,
}

impl SettingRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            key: row.get("key")?,
            value: row.get("value")?,
            description: row.get("description")?,
            updated_at: row.get("updated_at")?,
            updated_by: row.get("updated_by")?,
        })
    }
}

/// Inserts or replaces a setting. A `None` description keeps the stored one.
pub fn upsert(db: &Database, setting: &SettingRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO application_settings (key, value, description, updated_at, updated_by)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                description = COALESCE(excluded.description, application_settings.description),
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by",
            params![
                setting.key,
                setting.value,
                setting.description,
                setting.updated_at,
                setting.updated_by,
            ],
        )?;
        Ok(())
    })
}

pub fn get(db: &Database, key: &str) -> Result<Option<SettingRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM application_settings WHERE key = ?1",
                params![key],
                SettingRow::from_row,
            )
            .optional()?)
    })
}

pub fn list_all(db: &Database) -> Result<Vec<SettingRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM application_settings ORDER BY key")?;
        let rows = stmt
            .query_map([], SettingRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
