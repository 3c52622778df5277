use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use super::model::{Job, JobStep};

/// One step as shown to polling clients.
#[derive(Debug, Clone, Serialize)]
pub struct StepStatus {
    pub name: String,
    pub state: String,
    pub progress: f64,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&JobStep> for StepStatus {
    fn from(step: &JobStep) -> Self {
        Self {
            name: step.name.clone(),
            state: step.state.as_str().to_string(),
            progress: step.state.progress(),
            retry_count: step.retry_count,
            started_at: step.started_at,
            finished_at: step.finished_at,
        }
    }
}

/// Snapshot of a job returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: String,
    /// External state name; `succeeded` is reported as `completed`.
    pub state: String,
    pub current_step: Option<String>,
    pub progress: f64,
    pub steps: Vec<StepStatus>,
    pub retry_count: u32,
    pub last_error_message: Option<String>,
    pub input_uri: Option<String>,
    pub output_uri: Option<String>,
    /// Time-limited download link for the output, when one can be issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_url: Option<String>,
    pub meta: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobStatusView {
    pub fn new(job: &Job, steps: &[JobStep], output_url: Option<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            state: job.state.external_name().to_string(),
            current_step: job.current_step.clone(),
            progress: job.progress,
            steps: steps.iter().map(StepStatus::from).collect(),
            retry_count: job.retry_count,
            last_error_message: job.last_error_message.clone(),
            input_uri: job.input_uri.clone(),
            output_uri: job.output_uri().map(str::to_string),
            output_url,
            meta: job.meta.clone(),
            created_at: job.created_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::model::{JobState, StepState};

    #[test]
    fn test_succeeded_is_reported_as_completed() {
        let mut job = Job::new("j1".into(), "u1".into(), "s3://uploads/v1.mp4".into());
        job.state = JobState::Succeeded;
        job.progress = 100.0;
        job.meta
            .insert("output_s3_uri".into(), "s3://outputs/jobs/j1.mp4".into());

        let step = JobStep {
            id: 1,
            job_id: "j1".into(),
            name: "asr".into(),
            state: StepState::Running,
            started_at: None,
            finished_at: None,
            metrics: Map::new(),
            retry_count: 0,
        };

        let view = JobStatusView::new(&job, &[step], None);
        assert_eq!(view.state, "completed");
        assert_eq!(view.output_uri.as_deref(), Some("s3://outputs/jobs/j1.mp4"));
        assert_eq!(view.steps[0].progress, 50.0);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["job_id"], "j1");
        assert!(json.get("output_url").is_none());
    }
}
