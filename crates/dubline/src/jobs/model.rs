use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::db::job_repo::JobRow;
use crate::db::step_repo::StepRow;
use crate::db::DatabaseError;

// ─── Helpers ────────────────────────────────────────────────────────────────

pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::UnknownValue {
            kind: "timestamp",
            value: s.to_string(),
        })
}

fn parse_optional_timestamp(s: Option<&str>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.map(parse_timestamp).transpose()
}

pub(crate) fn parse_json_map(
    column: &'static str,
    raw: &str,
) -> Result<Map<String, Value>, DatabaseError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    serde_json::from_str(raw).map_err(|source| DatabaseError::Json { column, source })
}

pub(crate) fn encode_json_map(
    column: &'static str,
    map: &Map<String, Value>,
) -> Result<String, DatabaseError> {
    serde_json::to_string(map).map_err(|source| DatabaseError::Json { column, source })
}

// ─── JobState ───────────────────────────────────────────────────────────────

/// Overall state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// Name shown to clients polling the job.
    pub fn external_name(&self) -> &'static str {
        match self {
            JobState::Succeeded => "completed",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "running" => Ok(JobState::Running),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            "cancelled" => Ok(JobState::Cancelled),
            other => Err(DatabaseError::UnknownValue {
                kind: "job state",
                value: other.to_string(),
            }),
        }
    }
}

// ─── StepState ──────────────────────────────────────────────────────────────

/// State of one ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Running,
    Retrying,
    Succeeded,
    Failed,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Running => "running",
            StepState::Retrying => "retrying",
            StepState::Succeeded => "succeeded",
            StepState::Failed => "failed",
        }
    }

    /// Per-step progress reported in status views.
    pub fn progress(&self) -> f64 {
        match self {
            StepState::Succeeded => 100.0,
            StepState::Running => 50.0,
            _ => 0.0,
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepState {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepState::Pending),
            "running" => Ok(StepState::Running),
            "retrying" => Ok(StepState::Retrying),
            "succeeded" => Ok(StepState::Succeeded),
            "failed" => Ok(StepState::Failed),
            other => Err(DatabaseError::UnknownValue {
                kind: "step state",
                value: other.to_string(),
            }),
        }
    }
}

// ─── Job ────────────────────────────────────────────────────────────────────

/// Durable aggregate for one dubbing job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub project_id: Option<String>,
    pub input_uri: Option<String>,
    pub state: JobState,
    pub current_step: Option<String>,
    pub progress: f64,
    pub retry_count: u32,
    /// Chain generation. Tasks scheduled under an older value are stale.
    pub attempt: u32,
    pub error_code: Option<String>,
    pub last_error_message: Option<String>,
    pub meta: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A fresh `queued` job.
    pub fn new(id: String, user_id: String, input_uri: String) -> Self {
        Self {
            id,
            user_id,
            project_id: None,
            input_uri: Some(input_uri),
            state: JobState::Queued,
            current_step: None,
            progress: 0.0,
            retry_count: 0,
            attempt: 0,
            error_code: None,
            last_error_message: None,
            meta: Map::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_project(mut self, project_id: Option<String>) -> Self {
        self.project_id = project_id;
        self
    }

    pub fn output_uri(&self) -> Option<&str> {
        self.meta.get("output_s3_uri").and_then(Value::as_str)
    }

    pub(crate) fn to_row(&self) -> Result<JobRow, DatabaseError> {
        Ok(JobRow {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            project_id: self.project_id.clone(),
            input_uri: self.input_uri.clone(),
            state: self.state.as_str().to_string(),
            current_step: self.current_step.clone(),
            progress: self.progress,
            retry_count: i64::from(self.retry_count),
            attempt: i64::from(self.attempt),
            error_code: self.error_code.clone(),
            last_error_message: self.last_error_message.clone(),
            meta: encode_json_map("meta", &self.meta)?,
            created_at: format_timestamp(self.created_at),
            started_at: self.started_at.map(format_timestamp),
            finished_at: self.finished_at.map(format_timestamp),
        })
    }
}

impl TryFrom<JobRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            state: row.state.parse()?,
            meta: parse_json_map("meta", &row.meta)?,
            created_at: parse_timestamp(&row.created_at)?,
            started_at: parse_optional_timestamp(row.started_at.as_deref())?,
            finished_at: parse_optional_timestamp(row.finished_at.as_deref())?,
            retry_count: u32::try_from(row.retry_count).unwrap_or(0),
            attempt: u32::try_from(row.attempt).unwrap_or(0),
            id: row.id,
            user_id: row.user_id,
            project_id: row.project_id,
            input_uri: row.input_uri,
            current_step: row.current_step,
            progress: row.progress,
            error_code: row.error_code,
            last_error_message: row.last_error_message,
        })
    }
}

// ─── JobStep ────────────────────────────────────────────────────────────────

/// One ledger row: the execution record of a single stage of a job.
#[derive(Debug, Clone)]
pub struct JobStep {
    pub id: i64,
    pub job_id: String,
    pub name: String,
    pub state: StepState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub metrics: Map<String, Value>,
    pub retry_count: u32,
}

impl JobStep {
    pub fn duration_seconds(&self) -> Option<f64> {
        self.metrics.get("duration_seconds").and_then(Value::as_f64)
    }

    pub(crate) fn to_row(&self) -> Result<StepRow, DatabaseError> {
        Ok(StepRow {
            id: self.id,
            job_id: self.job_id.clone(),
            name: self.name.clone(),
            state: self.state.as_str().to_string(),
            started_at: self.started_at.map(format_timestamp),
            finished_at: self.finished_at.map(format_timestamp),
            metrics: encode_json_map("metrics", &self.metrics)?,
            retry_count: i64::from(self.retry_count),
        })
    }
}

impl TryFrom<StepRow> for JobStep {
    type Error = DatabaseError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(Self {
            state: row.state.parse()?,
            started_at: parse_optional_timestamp(row.started_at.as_deref())?,
            finished_at: parse_optional_timestamp(row.finished_at.as_deref())?,
            metrics: parse_json_map("metrics", &row.metrics)?,
            retry_count: u32::try_from(row.retry_count).unwrap_or(0),
            id: row.id,
            job_id: row.job_id,
            name: row.name,
        })
    }
}
