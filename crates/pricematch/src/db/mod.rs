//! SQLite persistence for users, price lists, jobs and their results.
//!
//! Every repository function takes a `&Database` and runs under its single
//! connection lock. Timestamps are INTEGER milliseconds since the Unix epoch.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

pub mod activity_repo;
pub mod batch_repo;
pub mod client_repo;
pub mod error;
pub mod job_repo;
pub mod migrations;
pub mod price_item_repo;
pub mod project_repo;
pub mod result_repo;
pub mod settings_repo;
pub mod stats_repo;
pub mod user_repo;

pub use error::DatabaseError;

/// Shared handle to the migrated database. Clones share one connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

impl Database {
    /// Opens or creates the database file, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
            _ => {}
        }

        let db = Self::prepare(Connection::open(path)?, true)?;
        log::info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::prepare(Connection::open_in_memory()?, false)
    }

    fn prepare(conn: Connection, on_disk: bool) -> Result<Self, DatabaseError> {
        if on_disk {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        }
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` while holding the connection lock.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// Returns the default database path: `<data dir>/pricematch/pricematch.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .map(|d| d.join("pricematch").join("pricematch.db"))
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Generates a new random row identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Inserts an approved user and returns its id.
    pub fn seed_user(db: &Database, email: &str) -> String {
        let row = user_repo::UserRow {
            id: new_id(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            name: "Seed User".to_string(),
            role: "user".to_string(),
            is_approved: true,
            is_active: true,
            created_at: now_millis(),
            last_login: None,
            session_version: 0,
        };
        user_repo::insert(db, &row).unwrap();
        row.id
    }
}
