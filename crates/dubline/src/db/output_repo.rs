//! Output repository: produced artifacts per job.

use rusqlite::{params, Connection, Row};

use super::DatabaseError;

#[derive(Debug, Clone)]
pub struct OutputRow {
    pub id: i64,
    pub job_id: String,
    pub kind: String,
    pub uri: String,
    pub created_at: String,
}

impl OutputRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            kind: row.get("kind")?,
            uri: row.get("uri")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Records an artifact unless the same (job, kind, uri) is already present.
pub fn insert_if_absent(
    conn: &Connection,
    job_id: &str,
    kind: &str,
    uri: &str,
    created_at: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO job_outputs (job_id, kind, uri, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![job_id, kind, uri, created_at],
    )?;
    Ok(changed > 0)
}

pub fn list_for_job(conn: &Connection, job_id: &str) -> Result<Vec<OutputRow>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT * FROM job_outputs WHERE job_id = ?1 ORDER BY id ASC")?;
    let rows = stmt
        .query_map(params![job_id], OutputRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
