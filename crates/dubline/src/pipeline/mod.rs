pub mod error;
pub mod executor;
pub mod finalizer;
pub mod metrics;
pub mod orchestrator;
pub mod payload;
pub mod retry;
pub mod stage;

pub use error::{OrchestratorError, StageError};
pub use executor::StageExecutor;
pub use finalizer::{finalize, FINALIZATION_FAILED};
pub use metrics::TextMetrics;
pub use orchestrator::{
    Orchestrator, OrchestratorSettings, RecoveryReport, RetryAllOutcome, Submission,
    INTERRUPTED_MESSAGE,
};
pub use payload::StagePayload;
pub use retry::{RetryDecision, RetryPolicy};
pub use stage::Stage;
