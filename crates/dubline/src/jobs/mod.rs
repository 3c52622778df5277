//! Job records, the step ledger, and the status view built from them.

pub mod ledger;
pub mod model;
pub mod status;

pub use ledger::{Completion, Ledger, Started, OUTPUT_URI_KEY};
pub use model::{Job, JobState, JobStep, StepState};
pub use status::{JobStatusView, StepStatus};
