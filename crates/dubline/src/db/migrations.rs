//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order. Column additions are conditional so a
//! database touched by an older build can be upgraded safely.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
    kind: MigrationKind,
}

enum MigrationKind {
    /// Execute the SQL directly.
    Standard,
    /// ALTER TABLE ADD COLUMN, skipped if the column already exists.
    AddColumn {
        table: &'static str,
        column: &'static str,
    },
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_jobs_table",
        sql: include_str!("sql/001_create_jobs.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 2,
        description: "create_job_steps_table",
        sql: include_str!("sql/002_create_job_steps.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 3,
        description: "create_job_outputs_table",
        sql: include_str!("sql/003_create_job_outputs.sql"),
        kind: MigrationKind::Standard,
    },
    Migration {
        version: 4,
        description: "add_error_code_to_jobs",
        sql: include_str!("sql/004_add_error_code.sql"),
        kind: MigrationKind::AddColumn {
            table: "jobs",
            column: "error_code",
        },
    },
    Migration {
        version: 5,
        description: "add_attempt_to_jobs",
        sql: include_str!("sql/005_add_attempt.sql"),
        kind: MigrationKind::AddColumn {
            table: "jobs",
            column: "attempt",
        },
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let should_run = match &migration.kind {
            MigrationKind::Standard => true,
            MigrationKind::AddColumn { table, column } => !column_exists(conn, table, column)?,
        };

        if should_run {
            conn.execute_batch(migration.sql)
                .map_err(|e| DatabaseError::Migration {
                    version: migration.version,
                    reason: e.to_string(),
                })?;
        } else {
            log::info!(
                "Skipping migration v{} (column already present)",
                migration.version
            );
        }

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

/// Checks whether a column exists on a table using `PRAGMA table_info`.
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

    fn migrated() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        conn
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = migrated();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_add_column_skipped_when_present() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(include_str!("sql/001_create_jobs.sql"))
            .unwrap();
        conn.execute_batch("ALTER TABLE jobs ADD COLUMN error_code TEXT;")
            .unwrap();

        run_all(&conn).unwrap();
        assert!(column_exists(&conn, "jobs", "error_code").unwrap());
    }

    #[test]
    fn test_job_steps_unique_per_job_and_name() {
        let conn = migrated();
        conn.execute(
            "INSERT INTO jobs (id, user_id, created_at) VALUES ('j1', 'u1', '2026-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO job_steps (job_id, name) VALUES ('j1', 'asr')",
            [],
        )
        .unwrap();

        let dup = conn.execute(
            "INSERT INTO job_steps (job_id, name) VALUES ('j1', 'asr')",
            [],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_deleting_job_cascades_to_steps() {
        let conn = migrated();
        conn.execute(
            "INSERT INTO jobs (id, user_id, created_at) VALUES ('j1', 'u1', '2026-01-01')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO job_steps (job_id, name) VALUES ('j1', 'asr')",
            [],
        )
        .unwrap();

        conn.execute("DELETE FROM jobs WHERE id = 'j1'", []).unwrap();
        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM job_steps", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
