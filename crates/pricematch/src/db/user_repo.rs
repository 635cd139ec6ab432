//! User repository: accounts, approval flags and roles.

use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{Database, DatabaseError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRow {
    pub id: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub is_approved: bool,
    pub is_active: bool,
    pub created_at: i64,
    pub last_login: Option<i64>,
    /// Bumped on logout; refresh tokens carrying an older value are refused.
    #[serde(skip_serializing)]
    pub session_version: i64,
}

impl UserRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            email: row.get("email")?,
            password_hash: row.get("password_hash")?,
            name: row.get("name")?,
            role: row.get("role")?,
            is_approved: row.get("is_approved")?,
            is_active: row.get("is_active")?,
            created_at: row.get("created_at")?,
            last_login: row.get("last_login")?,
            session_version: row.get("session_version")?,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Inserts a user. Emails are stored lowercased; a duplicate email yields
/// [`DatabaseError::Conflict`].
pub fn insert(db: &Database, user: &UserRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO users (id, email, password_hash, name, role, is_approved, is_active,
             created_at, last_login)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                user.id,
                user.email.trim().to_lowercase(),
                user.password_hash,
                user.name,
                user.role,
                user.is_approved,
                user.is_active,
                user.created_at,
                user.last_login,
            ],
        )
        .map_err(|e| DatabaseError::from_unique(e, "User with this email"))?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<UserRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM users WHERE id = ?1",
                params![id],
                UserRow::from_row,
            )
            .optional()?)
    })
}

/// Looks up a user by email, ignoring case.
pub fn find_by_email(db: &Database, email: &str) -> Result<Option<UserRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM users WHERE email = ?1 COLLATE NOCASE",
                params![email.trim()],
                UserRow::from_row,
            )
            .optional()?)
    })
}

/// Lists all users, newest first.
pub fn list_all(db: &Database) -> Result<Vec<UserRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM users ORDER BY created_at DESC")?;
        let rows = stmt
            .query_map([], UserRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Marks a user approved. Returns false if the user does not exist.
pub fn approve(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE users SET is_approved = 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(changed > 0)
    })
}

/// Sets a user's role. Returns false if the user does not exist.
pub fn set_role(db: &Database, id: &str, role: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("UPDATE users SET role = ?2 WHERE id = ?1", params![id, role])?;
        Ok(changed > 0)
    })
}

pub fn update_password(db: &Database, id: &str, password_hash: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE users SET password_hash = ?2 WHERE id = ?1",
            params![id, password_hash],
        )?;
        Ok(changed > 0)
    })
}

/// Invalidates every refresh token issued so far. Returns the new version,
/// or `None` if the user does not exist.
pub fn bump_session_version(db: &Database, id: &str) -> Result<Option<i64>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "UPDATE users SET session_version = session_version + 1 WHERE id = ?1
                 RETURNING session_version",
                params![id],
                |r| r.get(0),
            )
            .optional()?)
    })
}

pub fn touch_last_login(db: &Database, id: &str, at: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE users SET last_login = ?2 WHERE id = ?1",
            params![id, at],
        )?;
        Ok(())
    })
}

/// Returns `(total, pending_approval)` user counts.
pub fn counts(db: &Database) -> Result<(u64, u64), DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN is_approved = 0 THEN 1 ELSE 0 END), 0)
             FROM users",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{new_id, now_millis};

    fn user(email: &str) -> UserRow {
        UserRow {
            id: new_id(),
            email: email.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            name: "Jane Estimator".to_string(),
            role: "user".to_string(),
            is_approved: false,
            is_active: true,
            created_at: now_millis(),
            last_login: None,
            session_version: 0,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = Database::open_in_memory().unwrap();
        let row = user("Jane@Example.com");
        insert(&db, &row).unwrap();

        let by_id = find_by_id(&db, &row.id).unwrap().unwrap();
        assert_eq!(by_id.email, "jane@example.com");
        assert!(!by_id.is_approved);

        let by_email = find_by_email(&db, "JANE@example.com").unwrap().unwrap();
        assert_eq!(by_email.id, row.id);
    }

    #[test]
    fn test_duplicate_email_conflict() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, &user("dup@example.com")).unwrap();
        let err = insert(&db, &user("DUP@example.com")).unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
    }

    #[test]
    fn test_approve_and_role() {
        let db = Database::open_in_memory().unwrap();
        let row = user("a@example.com");
        insert(&db, &row).unwrap();

        assert!(approve(&db, &row.id).unwrap());
        assert!(set_role(&db, &row.id, "admin").unwrap());
        let updated = find_by_id(&db, &row.id).unwrap().unwrap();
        assert!(updated.is_approved);
        assert!(updated.is_admin());

        assert!(!approve(&db, "missing").unwrap());
    }

    #[test]
    fn test_bump_session_version() {
        let db = Database::open_in_memory().unwrap();
        let row = user("s@example.com");
        insert(&db, &row).unwrap();

        assert_eq!(bump_session_version(&db, &row.id).unwrap(), Some(1));
        assert_eq!(bump_session_version(&db, &row.id).unwrap(), Some(2));
        assert_eq!(find_by_id(&db, &row.id).unwrap().unwrap().session_version, 2);
        assert_eq!(bump_session_version(&db, "missing").unwrap(), None);
    }

    #[test]
    fn test_password_hash_not_serialized() {
        let json = serde_json::to_value(user("x@example.com")).unwrap();
        assert!(json.get("passwordHash").is_none());
        assert!(json.get("isApproved").is_some());
        assert!(json.get("sessionVersion").is_none());
    }

    #[test]
    fn test_counts() {
        let db = Database::open_in_memory().unwrap();
        let a = user("a@example.com");
        insert(&db, &a).unwrap();
        insert(&db, &user("b@example.com")).unwrap();
        approve(&db, &a.id).unwrap();
        assert_eq!(counts(&db).unwrap(), (2, 1));
    }
}
