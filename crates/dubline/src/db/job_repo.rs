//! Job repository: row access for the `jobs` table.
//!
//! Functions take a `&Connection` so the ledger can compose several of
//! them inside one transaction. State-changing updates only touch jobs
//! that are still live (`queued` or `running`); a job that has already
//! reached a terminal state is never modified by them.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// SQL predicate matching jobs that have not reached a terminal state.
const LIVE: &str = "state IN ('queued', 'running')";

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub input_uri: Option<String>,
    pub state: String,
    pub current_step: Option<String>,
    pub progress: f64,
    pub retry_count: i64,
    /// Bumped on every manual retry; stage tasks carry the value they were
    /// scheduled under.
    pub attempt: i64,
    pub error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub meta: String,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            project_id: row.get("project_id")?,
            input_uri: row.get("input_uri")?,
            state: row.get("state")?,
            current_step: row.get("current_step")?,
            progress: row.get("progress")?,
            retry_count: row.get("retry_count")?,
            attempt: row.get("attempt")?,
            error_code: row.get("error_code")?,
            last_error_message: row.get("last_error_message")?,
            meta: row.get("meta")?,
            created_at: row.get("created_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

/// Inserts a new job row.
pub fn insert(conn: &Connection, job: &JobRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, user_id, project_id, input_uri, state, current_step, progress,
         retry_count, attempt, error_code, last_error_message, meta, created_at, started_at,
         finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            job.id,
            job.user_id,
            job.project_id,
            job.input_uri,
            job.state,
            job.current_step,
            job.progress,
            job.retry_count,
            job.attempt,
            job.error_code,
            job.last_error_message,
            job.meta,
            job.created_at,
            job.started_at,
            job.finished_at,
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Returns the ids of all jobs in `state`, oldest first.
pub fn ids_by_state(conn: &Connection, state: &str) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT id FROM jobs WHERE state = ?1 ORDER BY created_at ASC")?;
    let ids = stmt
        .query_map(params![state], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// Moves a `queued` job to `running`. Only one caller can win this for a
/// given attempt; `started_at` is only written the first time.
pub fn update_started(conn: &Connection, id: &str, now: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET state = 'running', started_at = COALESCE(started_at, ?2)
         WHERE id = ?1 AND state = 'queued'",
        params![id, now],
    )?;
    Ok(changed > 0)
}

/// Records the step a live job is currently executing.
pub fn update_current_step(
    conn: &Connection,
    id: &str,
    step: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        &format!(
            "UPDATE jobs SET current_step = ?2, state = 'running',
             started_at = COALESCE(started_at, ?3)
             WHERE id = ?1 AND {LIVE}"
        ),
        params![id, step, now],
    )?;
    Ok(changed > 0)
}

/// Sets the progress percentage of a live job.
pub fn update_progress(conn: &Connection, id: &str, progress: f64) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        &format!("UPDATE jobs SET progress = ?2 WHERE id = ?1 AND {LIVE}"),
        params![id, progress],
    )?;
    Ok(changed > 0)
}

/// Counts an in-flight step retry against a live job.
pub fn update_retrying(conn: &Connection, id: &str, error: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        &format!(
            "UPDATE jobs SET retry_count = retry_count + 1, last_error_message = ?2
             WHERE id = ?1 AND {LIVE}"
        ),
        params![id, error],
    )?;
    Ok(changed > 0)
}

/// Marks a live job as failed.
pub fn update_failed(
    conn: &Connection,
    id: &str,
    error: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        &format!(
            "UPDATE jobs SET state = 'failed', error_code = ?2, last_error_message = ?2,
             finished_at = ?3
             WHERE id = ?1 AND {LIVE}"
        ),
        params![id, error, now],
    )?;
    Ok(changed > 0)
}

/// Marks a live job as succeeded and stores its merged meta.
pub fn update_succeeded(
    conn: &Connection,
    id: &str,
    meta: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        &format!(
            "UPDATE jobs SET state = 'succeeded', current_step = 'completed', progress = 100,
             meta = ?2, finished_at = ?3
             WHERE id = ?1 AND {LIVE}"
        ),
        params![id, meta, now],
    )?;
    Ok(changed > 0)
}

/// Marks a live job as cancelled.
pub fn update_cancelled(conn: &Connection, id: &str, now: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        &format!("UPDATE jobs SET state = 'cancelled', finished_at = ?2 WHERE id = ?1 AND {LIVE}"),
        params![id, now],
    )?;
    Ok(changed > 0)
}

/// Puts a terminal job back into `queued` for a manual retry and opens a
/// new attempt.
pub fn update_requeued(conn: &Connection, id: &str, meta: &str) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET state = 'queued', error_code = NULL, current_step = NULL,
         progress = 0, started_at = NULL, finished_at = NULL,
         retry_count = retry_count + 1, attempt = attempt + 1, meta = ?2
         WHERE id = ?1 AND state IN ('succeeded', 'failed', 'cancelled')",
        params![id, meta],
    )?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn sample_job(id: &str) -> JobRow {
        JobRow {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            project_id: None,
            input_uri: Some("s3://uploads/v1.mp4".to_string()),
            state: "queued".to_string(),
            current_step: None,
            progress: 0.0,
            retry_count: 0,
            attempt: 0,
            error_code: None,
            last_error_message: None,
            meta: "{}".to_string(),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        db.with_conn(|conn| {
            insert(conn, &sample_job("j1"))?;
            let found = find_by_id(conn, "j1")?.unwrap();
            assert_eq!(found.user_id, "user-1");
            assert_eq!(found.state, "queued");
            assert!(find_by_id(conn, "missing")?.is_none());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_only_queued_job_starts() {
        let db = test_db();
        db.with_conn(|conn| {
            insert(conn, &sample_job("j1"))?;
            assert!(update_started(conn, "j1", "2026-01-01T00:01:00Z")?);
            assert!(!update_started(conn, "j1", "2026-01-01T00:05:00Z")?);
            let job = find_by_id(conn, "j1")?.unwrap();
            assert_eq!(job.state, "running");
            assert_eq!(job.started_at.as_deref(), Some("2026-01-01T00:01:00Z"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_terminal_job_is_not_touched() {
        let db = test_db();
        db.with_conn(|conn| {
            insert(conn, &sample_job("j1"))?;
            assert!(update_cancelled(conn, "j1", "2026-01-01T00:02:00Z")?);

            assert!(!update_current_step(conn, "j1", "asr", "2026-01-01T00:03:00Z")?);
            assert!(!update_failed(conn, "j1", "boom", "2026-01-01T00:03:00Z")?);
            assert!(!update_succeeded(conn, "j1", "{}", "2026-01-01T00:03:00Z")?);

            let job = find_by_id(conn, "j1")?.unwrap();
            assert_eq!(job.state, "cancelled");
            assert_eq!(job.finished_at.as_deref(), Some("2026-01-01T00:02:00Z"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_requeue_requires_terminal_state() {
        let db = test_db();
        db.with_conn(|conn| {
            insert(conn, &sample_job("j1"))?;
            assert!(!update_requeued(conn, "j1", "{}")?);

            update_failed(conn, "j1", "boom", "2026-01-01T00:02:00Z")?;
            assert!(update_requeued(conn, "j1", "{}")?);

            let job = find_by_id(conn, "j1")?.unwrap();
            assert_eq!(job.state, "queued");
            assert_eq!(job.retry_count, 1);
            assert_eq!(job.attempt, 1);
            assert!(job.error_code.is_none());
            assert!(job.finished_at.is_none());
            assert_eq!(job.last_error_message.as_deref(), Some("boom"));
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_ids_by_state_oldest_first() {
        let db = test_db();
        db.with_conn(|conn| {
            let mut newer = sample_job("newer");
            newer.state = "failed".to_string();
            newer.created_at = "2026-01-02T00:00:00Z".to_string();
            let mut older = sample_job("older");
            older.state = "failed".to_string();
            insert(conn, &newer)?;
            insert(conn, &older)?;
            insert(conn, &sample_job("queued"))?;

            assert_eq!(ids_by_state(conn, "failed")?, vec!["older", "newer"]);
            assert_eq!(ids_by_state(conn, "queued")?, vec!["queued"]);
            Ok(())
        })
        .unwrap();
    }
}
