//! Client repository. Clients are soft-deleted through `is_active`.

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRow {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub contact_person: Option<String>,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ClientRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            email: row.get("email")?,
            phone: row.get("phone")?,
            address: row.get("address")?,
            contact_person: row.get("contact_person")?,
            notes: row.get("notes")?,
            is_active: row.get("is_active")?,
            created_by: row.get("created_by")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub contact_person: Option<String>,
    pub notes: Option<String>,
    pub is_active: Option<bool>,
}

pub fn insert(db: &Database, client: &ClientRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO clients (id, name, email, phone, address, contact_person, notes,
             is_active, created_by, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                client.id,
                client.name,
                client.email,
                client.phone,
                client.address,
                client.contact_person,
                client.notes,
                client.is_active,
                client.created_by,
                client.created_at,
                client.updated_at,
            ],
        )?;
        Ok(())
    })
}

pub fn update(
    db: &Database,
    id: &str,
    changes: &ClientUpdate,
    now: i64,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE clients SET
                name = COALESCE(?2, name),
                email = COALESCE(?3, email),
                phone = COALESCE(?4, phone),
                address = COALESCE(?5, address),
                contact_person = COALESCE(?6, contact_person),
                notes = COALESCE(?7, notes),
                is_active = COALESCE(?8, is_active),
                updated_at = ?9
             WHERE id = ?1",
            params![
                id,
                changes.name,
                changes.email,
                changes.phone,
                changes.address,
                changes.contact_person,
                changes.notes,
                changes.is_active,
                now,
            ],
        )?;
        Ok(changed > 0)
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<ClientRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM clients WHERE id = ?1",
                params![id],
                ClientRow::from_row,
            )
            .optional()?)
    })
}

/// Lists clients by name, optionally only active ones.
pub fn list(db: &Database, active_only: bool) -> Result<Vec<ClientRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM clients WHERE (?1 = 0 OR is_active = 1) ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt
            .query_map(params![active_only], ClientRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Soft-deletes a client. Returns false if the client does not exist.
pub fn deactivate(db: &Database, id: &str, now: i64) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE clients SET is_active = 0, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(changed > 0)
    })
}

pub fn count_active(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM clients WHERE is_active = 1",
            [],
            |r| r.get(0),
        )?)
    })
}
