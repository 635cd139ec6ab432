//! Schema versioning for the price-matching tables.
//!
//! The lease column on `matching_jobs` arrived after the first release, so
//! it is added conditionally.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    Standard,
    /// Skipped when the column already exists.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_users_table",
        sql: include_str!("sql/001_create_users.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_price_items_table",
        sql: include_str!("sql/002_create_price_items.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_clients_and_projects_tables",
        sql: include_str!("sql/003_create_clients_and_projects.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "create_matching_jobs_tables",
        sql: include_str!("sql/004_create_matching_jobs.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 5,
        description: "create_match_results_table",
        sql: include_str!("sql/005_create_match_results.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 6,
        description: "create_activity_logs_table",
        sql: include_str!("sql/006_create_activity_logs.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 7,
        description: "create_application_settings_table",
        sql: include_str!("sql/007_create_application_settings.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 8,
        description: "add_claimed_until_to_matching_jobs",
        sql: include_str!("sql/008_add_claimed_until.sql"),
        kind: MigrationKind::AddColumn {
            table: "matching_jobs",
            column: "claimed_until",
        },
    },
    Migration {
        version: 9,
        description: "add_claimed_until_to_job_batches",
        sql: include_str!("sql/009_add_batch_claimed_until.sql"),
        kind: MigrationKind::AddColumn {
            table: "job_batches",
            column: "claimed_until",
        },
    },
    Migration {
        version: 10,
        description: "add_review_columns_to_match_results",
        sql: include_str!("sql/010_add_result_review_columns.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 11,
        description: "add_session_version_to_users",
        sql: include_str!("sql/011_add_session_version.sql"),
        kind: MigrationKind::AddColumn {
            table: "users",
            column: "session_version",
        },
    },
];

/// Applies every migration newer than the recorded schema version.
///
/// Each migration and its `_migrations` row commit in one transaction, so a
/// failed step leaves the schema at the previous version.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let schema_version = current_version(conn)?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > schema_version);

    for migration in pending {
        let tx = conn.unchecked_transaction()?;
        let needed = match migration.kind {
            MigrationKind::Standard => true,
            MigrationKind::AddColumn { table, column } => !column_exists(&tx, table, column)?,
        };

        if needed {
            log::info!("Applying schema v{} ({})", migration.version, migration.description);
            tx.execute_batch(migration.sql)
                .map_err(|e| DatabaseError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        } else {
            log::debug!("Schema v{} already present", migration.version);
        }

        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}

fn current_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?)
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("Invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .any(|r| r.map(|name| name == column).unwrap_or(false));
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        conn
    }

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = fresh();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = fresh();
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
        assert_eq!(current_version(&conn).unwrap(), 11);
    }

    #[test]
    fn test_claimed_until_column_added() {
        let conn = fresh();
        run_all(&conn).unwrap();
        assert!(column_exists(&conn, "matching_jobs", "claimed_until").unwrap());
        assert!(column_exists(&conn, "job_batches", "claimed_until").unwrap());
    }

    #[test]
    fn test_review_and_session_columns_added() {
        let conn = fresh();
        run_all(&conn).unwrap();
        assert!(column_exists(&conn, "match_results", "notes").unwrap());
        assert!(column_exists(&conn, "match_results", "is_manually_edited").unwrap());
        assert!(column_exists(&conn, "users", "session_version").unwrap());
    }

    #[test]
    fn test_add_column_skipped_when_present() {
        let conn = fresh();
        for migration in &MIGRATIONS[..7] {
            conn.execute_batch(migration.sql).unwrap();
        }
        conn.execute_batch("ALTER TABLE matching_jobs ADD COLUMN claimed_until INTEGER;")
            .unwrap();

        run_all(&conn).unwrap();
        assert!(column_exists(&conn, "matching_jobs", "claimed_until").unwrap());
    }

    #[test]
    fn test_column_exists_rejects_bad_table_name() {
        let conn = fresh();
        assert!(column_exists(&conn, "users; DROP TABLE users", "id").is_err());
    }

    #[test]
    fn test_user_email_unique_case_insensitive() {
        let conn = fresh();
        run_all(&conn).unwrap();
        conn.execute(
            "INSERT INTO users (id, email, password_hash, name, created_at) VALUES ('u1', 'a@b.com', 'h', 'A', 0)",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO users (id, email, password_hash, name, created_at) VALUES ('u2', 'A@B.com', 'h', 'B', 0)",
            [],
        );
        assert!(dup.is_err());
    }
}
