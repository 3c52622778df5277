use log::{error, info, warn};
use serde_json::{Map, Value};
use tracing::info_span;

use crate::db::DatabaseError;
use crate::jobs::{Completion, Ledger, OUTPUT_URI_KEY};

use super::metrics::{pipeline_metrics, transcripts, TextMetrics};
use super::payload::StagePayload;

/// Prefix of the error recorded when reconciliation itself fails.
pub const FINALIZATION_FAILED: &str = "finalization failed";

/// Reconciles the payload of a finished chain into the job record.
///
/// When the ledger write fails, the job is forced to `failed` before the
/// error is returned, so it never stays `running` with no way forward.
pub fn finalize(ledger: &Ledger, payload: &StagePayload) -> Result<Completion, DatabaseError> {
    let job_id = payload.job_id.as_str();
    let _span = info_span!("finalize", job_id = %job_id, attempt = payload.attempt).entered();

    let result = ledger.complete(job_id, payload.attempt, |_job, steps| {
        let mut patch = Map::new();
        if let Some(uri) = &payload.output_uri {
            patch.insert(OUTPUT_URI_KEY.to_string(), Value::from(uri.as_str()));
        }
        patch.extend(transcripts(payload));
        patch.insert(
            "pipeline_metrics".to_string(),
            Value::Object(pipeline_metrics(steps)),
        );
        let text_metrics = serde_json::to_value(TextMetrics::from_payload(payload))
            .unwrap_or(Value::Null);
        patch.insert("text_metrics".to_string(), text_metrics);
        patch
    });

    match result {
        Ok(Completion::Completed { output_uri }) => {
            info!(
                "Job {} completed, output {}",
                job_id,
                output_uri.as_deref().unwrap_or("<none>")
            );
            Ok(Completion::Completed { output_uri })
        }
        Ok(Completion::Skipped(state)) => {
            info!("Job {} is already {}, leaving it unchanged", job_id, state);
            Ok(Completion::Skipped(state))
        }
        Ok(Completion::Superseded { current }) => {
            info!(
                "Dropping finalizer of job {} for attempt {}, job is at attempt {}",
                job_id, payload.attempt, current
            );
            Ok(Completion::Superseded { current })
        }
        Ok(Completion::NotFound) => {
            warn!("Finalizer found no job {}", job_id);
            Ok(Completion::NotFound)
        }
        Err(e) => {
            error!("Finalizing job {} failed: {}", job_id, e);
            let message = format!("{}: {}", FINALIZATION_FAILED, e);
            if let Err(fail_err) = ledger.fail_job(job_id, &message) {
                error!("Could not record failure of job {}: {}", job_id, fail_err);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{job_repo, Database};
    use crate::jobs::{Job, JobState, StepState};
    use crate::pipeline::Stage;

    fn running_job(ledger: &Ledger) -> String {
        let job = Job::new(
            "j1".to_string(),
            "u1".to_string(),
            "s3://uploads/v1.mp4".to_string(),
        );
        ledger.create_job(&job).unwrap();
        ledger.begin(&job.id).unwrap();
        job.id
    }

    fn final_payload(job_id: &str) -> StagePayload {
        let mut payload = StagePayload::new(job_id, "s3://uploads/v1.mp4");
        payload.text = Some("hello there".into());
        payload.sw_text = Some("habari".into());
        payload.sentences = Some(vec!["Hello there.".into()]);
        payload.sw_sentences = Some(vec!["Habari.".into()]);
        payload.start = Some(0.0);
        payload.end = Some(4.0);
        payload.output_uri = Some(format!("s3://outputs/jobs/{}.mp4", job_id));
        payload
    }

    #[test]
    fn test_finalize_merges_results() {
        let ledger = Ledger::new(Database::open_in_memory().unwrap());
        let job_id = running_job(&ledger);
        ledger.mark_running(&job_id, Stage::Asr).unwrap();
        ledger.mark_succeeded(&job_id, Stage::Asr).unwrap();

        let outcome = finalize(&ledger, &final_payload(&job_id)).unwrap();
        assert_eq!(
            outcome,
            Completion::Completed {
                output_uri: Some("s3://outputs/jobs/j1.mp4".into())
            }
        );

        let job = ledger.job(&job_id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.current_step.as_deref(), Some("completed"));
        assert_eq!(job.progress, 100.0);
        assert!(job.finished_at.is_some());
        assert_eq!(job.meta["english"], "Hello there.");
        assert_eq!(job.meta["swahili_segments"][0], "Habari.");
        assert_eq!(job.meta["text_metrics"]["translation_ratio"], 0.5);
        assert!(job.meta["pipeline_metrics"]["asr"].is_number());
        assert!(job.meta["pipeline_metrics"]["total_duration_seconds"].is_number());

        let steps = ledger.steps(&job_id).unwrap();
        assert!(steps.iter().all(|s| s.state == StepState::Succeeded));
        assert_eq!(ledger.outputs(&job_id).unwrap().len(), 1);
    }

    #[test]
    fn test_finalize_leaves_cancelled_job_alone() {
        let ledger = Ledger::new(Database::open_in_memory().unwrap());
        let job_id = running_job(&ledger);
        assert!(ledger.cancel(&job_id).unwrap());

        let outcome = finalize(&ledger, &final_payload(&job_id)).unwrap();
        assert_eq!(outcome, Completion::Skipped(JobState::Cancelled));

        let job = ledger.job(&job_id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Cancelled);
        assert!(job.meta.get(OUTPUT_URI_KEY).is_none());
        assert!(ledger.outputs(&job_id).unwrap().is_empty());
    }

    #[test]
    fn test_finalize_unknown_job() {
        let ledger = Ledger::new(Database::open_in_memory().unwrap());
        assert_eq!(
            finalize(&ledger, &final_payload("ghost")).unwrap(),
            Completion::NotFound
        );
    }

    #[test]
    fn test_finalize_failure_fails_job() {
        let db = Database::open_in_memory().unwrap();
        let ledger = Ledger::new(db.clone());
        let job_id = running_job(&ledger);
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE jobs SET meta = 'not json' WHERE id = ?1",
                rusqlite::params![job_id],
            )?;
            Ok(())
        })
        .unwrap();

        let err = finalize(&ledger, &final_payload(&job_id)).unwrap_err();
        assert!(matches!(err, DatabaseError::Json { column: "meta", .. }));

        // The meta column is unreadable, so inspect the raw row.
        let row = db
            .with_conn(|conn| job_repo::find_by_id(conn, &job_id))
            .unwrap()
            .unwrap();
        assert_eq!(row.state, "failed");
        assert!(row.finished_at.is_some());
        assert!(row
            .last_error_message
            .unwrap()
            .starts_with(&format!("{}: ", FINALIZATION_FAILED)));
        assert!(ledger.outputs(&job_id).unwrap().is_empty());
    }

    #[test]
    fn test_finalize_drops_superseded_chain() {
        let ledger = Ledger::new(Database::open_in_memory().unwrap());
        let job_id = running_job(&ledger);
        ledger.cancel(&job_id).unwrap();
        ledger.reset_for_retry(&job_id).unwrap();
        ledger.begin(&job_id).unwrap();

        let outcome = finalize(&ledger, &final_payload(&job_id)).unwrap();
        assert_eq!(outcome, Completion::Superseded { current: 1 });
        let job = ledger.job(&job_id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Running);
        assert!(job.meta.get(OUTPUT_URI_KEY).is_none());
    }
}
