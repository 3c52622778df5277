use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pipeline::{Stage, StagePayload};

/// Identifier assigned to every scheduled task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A unit of work in a job's chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    RunStage { stage: Stage, payload: StagePayload },
    Finalize { payload: StagePayload },
}

impl Task {
    pub fn payload(&self) -> &StagePayload {
        match self {
            Task::RunStage { payload, .. } | Task::Finalize { payload } => payload,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.payload().job_id
    }

    /// Short label for logs: the stage name or `finalize`.
    pub fn label(&self) -> &'static str {
        match self {
            Task::RunStage { stage, .. } => stage.as_str(),
            Task::Finalize { .. } => "finalize",
        }
    }
}

/// A task together with the id it was scheduled under.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub id: TaskId,
    pub task: Task,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_labels() {
        let payload = StagePayload::new("j1", "s3://uploads/v1.mp4");
        let run = Task::RunStage {
            stage: Stage::SeparateMusic,
            payload: payload.clone(),
        };
        assert_eq!(run.label(), "separate_music");
        assert_eq!(run.job_id(), "j1");
        assert_eq!(Task::Finalize { payload }.label(), "finalize");
    }

    #[test]
    fn test_task_json_is_tagged() {
        let task = Task::RunStage {
            stage: Stage::Tts,
            payload: StagePayload::new("j1", "s3://uploads/v1.mp4").with_attempt(3),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["kind"], "run_stage");
        assert_eq!(json["stage"], "tts");
        assert_eq!(json["payload"]["attempt"], 3);
        assert_eq!(task.payload().attempt, 3);
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(TaskId::generate(), TaskId::generate());
    }
}
