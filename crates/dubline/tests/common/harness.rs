//! Test harness for driving job chains synchronously.
//!
//! The `TestHarness` wires an `Orchestrator` to:
//! - a `FileBlobStore` rooted in a temporary directory
//! - an in-memory database
//! - a `FakeBackend` with injectable failures
//! - a `ManualQueue` that the test drains explicitly

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::SecretString;
use tempfile::TempDir;

use dubline::jobs::{Job, JobState, JobStep, Ledger};
use dubline::pipeline::{Orchestrator, OrchestratorSettings, RetryPolicy};
use dubline::storage::{BlobStore, FileBlobStore, UrlSigner};
use dubline::worker::TaskHandler;
use dubline::Database;

use super::fakes::{FakeBackend, ManualQueue};

pub const TEST_SIGNING_KEY: &str =
    "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

/// Upper bound on tasks handled by one `drain`, so a chain that keeps
/// rescheduling itself fails the test instead of hanging it.
const MAX_TASKS: usize = 200;

pub struct TestHarness {
    temp_dir: TempDir,
    /// Same database the ledger writes to, for tests that tamper with rows.
    pub db: Database,
    pub blobs: Arc<FileBlobStore>,
    pub backend: Arc<FakeBackend>,
    pub queue: Arc<ManualQueue>,
    pub orchestrator: Orchestrator,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_retry(RetryPolicy::default())
    }

    pub fn with_retry(retry: RetryPolicy) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let signer = UrlSigner::from_hex_key(&SecretString::from(TEST_SIGNING_KEY))
            .expect("valid test key");
        let blobs = Arc::new(
            FileBlobStore::new(temp_dir.path().join("blobs"))
                .with_signer(signer, "http://blobs.test"),
        );
        let backend = Arc::new(FakeBackend::new());
        let queue = Arc::new(ManualQueue::new());
        let db = Database::open_in_memory().expect("Failed to open database");

        let settings = OrchestratorSettings {
            retry,
            ..OrchestratorSettings::default()
        };
        let orchestrator = Orchestrator::new(
            Ledger::new(db.clone()),
            backend.clone(),
            blobs.clone(),
            queue.clone(),
            settings,
        );

        Self {
            temp_dir,
            db,
            blobs,
            backend,
            queue,
            orchestrator,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        self.orchestrator.ledger()
    }

    pub fn blob_root(&self) -> PathBuf {
        self.temp_dir.path().join("blobs")
    }

    /// Stores `s3://uploads/{key}` and creates a `queued` job reading it.
    pub async fn seed_job(&self, key: &str) -> String {
        let uri = self
            .blobs
            .put("uploads", key, b"source-video".to_vec())
            .await
            .expect("Failed to store input");
        let job_id = uuid::Uuid::new_v4().to_string();
        let job = Job::new(job_id.clone(), "user-1".to_string(), uri.to_string());
        self.ledger().create_job(&job).expect("Failed to create job");
        job_id
    }

    /// Seeds a job from `uploads/v1.mp4`, starts it and runs the chain.
    pub async fn run_new_job(&self) -> String {
        let job_id = self.seed_job("v1.mp4").await;
        self.orchestrator.start(&job_id).expect("start failed");
        self.drain().await;
        job_id
    }

    /// Handles queued tasks until the queue is empty. Returns how many ran.
    pub async fn drain(&self) -> usize {
        let mut handled = 0;
        while let Some(envelope) = self.queue.pop() {
            assert!(handled < MAX_TASKS, "chain did not settle");
            self.orchestrator.handle(envelope).await;
            handled += 1;
        }
        handled
    }

    /// Handles exactly one queued task, if any.
    pub async fn step(&self) -> bool {
        match self.queue.pop() {
            Some(envelope) => {
                self.orchestrator.handle(envelope).await;
                true
            }
            None => false,
        }
    }

    pub fn job(&self, job_id: &str) -> Job {
        self.ledger()
            .job(job_id)
            .expect("database error")
            .expect("job not found")
    }

    pub fn steps(&self, job_id: &str) -> Vec<JobStep> {
        self.ledger().steps(job_id).expect("database error")
    }

    pub fn step_named(&self, job_id: &str, name: &str) -> JobStep {
        self.steps(job_id)
            .into_iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("no step {}", name))
    }

    /// `finished_at` is set exactly when the job is terminal.
    pub fn assert_finished_at_consistent(&self, job_id: &str) {
        let job = self.job(job_id);
        assert_eq!(
            job.finished_at.is_some(),
            job.state.is_terminal(),
            "job {} is {} with finished_at {:?}",
            job_id,
            job.state,
            job.finished_at
        );
    }

    pub fn assert_state(&self, job_id: &str, state: JobState) {
        assert_eq!(self.job(job_id).state, state);
        self.assert_finished_at_consistent(job_id);
    }
}
