//! Step repository: row access for the `job_steps` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::DatabaseError;

/// A raw step row from the database.
#[derive(Debug, Clone)]
pub struct StepRow {
    pub id: i64,
    pub job_id: String,
    pub name: String,
    pub state: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub metrics: String,
    pub retry_count: i64,
}

impl StepRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            name: row.get("name")?,
            state: row.get("state")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            metrics: row.get("metrics")?,
            retry_count: row.get("retry_count")?,
        })
    }
}

/// Creates a `pending` row for every name not yet present for the job.
/// Returns how many rows were added.
pub fn insert_missing(
    conn: &Connection,
    job_id: &str,
    names: &[&str],
) -> Result<usize, DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO job_steps (job_id, name, state) VALUES (?1, ?2, 'pending')",
    )?;
    let mut added = 0;
    for name in names {
        added += stmt.execute(params![job_id, name])?;
    }
    Ok(added)
}

/// Finds the step row for (job, name).
pub fn find(conn: &Connection, job_id: &str, name: &str) -> Result<Option<StepRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM job_steps WHERE job_id = ?1 AND name = ?2",
            params![job_id, name],
            StepRow::from_row,
        )
        .optional()?;
    Ok(row)
}

/// Lists all step rows of a job in creation order.
pub fn list_for_job(conn: &Connection, job_id: &str) -> Result<Vec<StepRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM job_steps WHERE job_id = ?1 ORDER BY id ASC")?;
    let rows = stmt
        .query_map(params![job_id], StepRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Overwrites the mutable columns of an existing step row.
pub fn update(conn: &Connection, step: &StepRow) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE job_steps SET state = ?2, started_at = ?3, finished_at = ?4, metrics = ?5,
         retry_count = ?6
         WHERE id = ?1",
        params![
            step.id,
            step.state,
            step.started_at,
            step.finished_at,
            step.metrics,
            step.retry_count,
        ],
    )?;
    Ok(())
}

/// Resets every step of a job to `pending` with cleared fields.
pub fn reset_all(conn: &Connection, job_id: &str) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE job_steps SET state = 'pending', started_at = NULL, finished_at = NULL,
         metrics = '{}', retry_count = 0
         WHERE job_id = ?1",
        params![job_id],
    )?;
    Ok(changed)
}
