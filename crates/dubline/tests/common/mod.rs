//! Shared utilities for dubline integration tests.
//!
//! - `TestHarness`: orchestrator wired to a temp-dir blob store, an
//!   in-memory database, a fake processing backend and a manual queue
//! - `FakeBackend` / `ManualQueue`: programmable collaborators

pub mod fakes;
pub mod harness;

pub use fakes::{FailureMode, FakeBackend, ManualQueue};
pub use harness::TestHarness;
