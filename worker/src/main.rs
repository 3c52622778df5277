use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info, warn};

use dubline::config::Config;
use dubline::error::{ConfigError, DublineError, WorkerError};
use dubline::pipeline::{Orchestrator, OrchestratorSettings};
use dubline::storage::{BlobStore, FileBlobStore, UrlSigner};
use dubline::worker::{Task, TaskId, TaskQueue, WorkerPool};
use dubline::{Database, HttpProcessingClient, Ledger, ProcessingBackend};

/// How often `run` looks for newly queued jobs.
const QUEUED_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(
    name = "dubline-worker",
    version,
    about = "Runs and manages dubline video dubbing jobs",
    after_help = "Examples:\n  \
    dubline-worker --config dubline.json run\n  \
    dubline-worker --config dubline.json submit talk.mp4 --user u-42\n  \
    dubline-worker --config dubline.json status 0b6f...\n  \
    dubline-worker --config dubline.json retry-failed"
)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "DUBLINE_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the worker pool until interrupted
    Run,
    /// Upload a video and queue a dubbing job for it
    Submit {
        file: PathBuf,
        #[arg(long)]
        user: String,
        #[arg(long)]
        project: Option<String>,
    },
    /// Print the status of a job as JSON
    Status { job_id: String },
    /// Queue a finished job to run again from the first stage
    Retry { job_id: String },
    /// Queue every failed job to run again
    RetryFailed,
    /// Cancel a queued or running job
    Cancel { job_id: String },
    /// Check that the processing service answers
    Health,
}

/// Queue used by one-shot commands. They only write `queued` jobs, which a
/// running worker picks up.
struct NoQueue;

impl TaskQueue for NoQueue {
    fn enqueue(&self, _task: Task, _delay: Duration) -> Result<TaskId, WorkerError> {
        Err(WorkerError::ChannelClosed)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match dubline::load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", cli.config.display(), e);
            return ExitCode::FAILURE;
        }
    };
    dubline::telemetry::init_logging(config.log_format);

    match execute(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Commands, config: &Config) -> Result<(), DublineError> {
    if let Commands::Run = command {
        return run_worker(config);
    }

    let orchestrator = build_orchestrator(config, Arc::new(NoQueue))?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(WorkerError::Runtime)?;

    match command {
        Commands::Run => Ok(()),
        Commands::Submit {
            file,
            user,
            project,
        } => {
            let bytes = std::fs::read(&file).map_err(|e| ConfigError::ReadFile {
                path: file.clone(),
                source: e,
            })?;
            let file_name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let job_id =
                runtime.block_on(orchestrator.create(&user, project, &file_name, bytes))?;
            print_json(&serde_json::json!({ "job_id": job_id, "state": "queued" }));
            Ok(())
        }
        Commands::Status { job_id } => {
            print_json(&orchestrator.status(&job_id)?);
            Ok(())
        }
        Commands::Retry { job_id } => {
            runtime.block_on(orchestrator.requeue(&job_id))?;
            print_json(&serde_json::json!({ "job_id": job_id, "state": "queued" }));
            Ok(())
        }
        Commands::RetryFailed => {
            let outcome = runtime.block_on(orchestrator.requeue_all_failed())?;
            print_json(&outcome);
            Ok(())
        }
        Commands::Cancel { job_id } => {
            orchestrator.cancel(&job_id)?;
            print_json(&serde_json::json!({ "job_id": job_id, "state": "cancelled" }));
            Ok(())
        }
        Commands::Health => {
            runtime.block_on(orchestrator.processing_health())?;
            print_json(&serde_json::json!({ "processing": "ok" }));
            Ok(())
        }
    }
}

fn run_worker(config: &Config) -> Result<(), DublineError> {
    let mut pool = WorkerPool::new(config.worker_count)?;
    let orchestrator = Arc::new(build_orchestrator(config, Arc::new(pool.queue()))?);

    let report = orchestrator.recover()?;
    if !report.interrupted.is_empty() {
        warn!(
            "{} interrupted jobs marked failed: {:?}",
            report.interrupted.len(),
            report.interrupted
        );
    }
    pool.start(orchestrator.clone())?;
    info!(
        "Worker running with {} threads, {} queued jobs started",
        config.worker_count,
        report.started.len()
    );

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .map_err(|e| WorkerError::SpawnFailed(format!("signal handler: {}", e)))?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(QUEUED_POLL_INTERVAL);
        match orchestrator.start_queued() {
            Ok(started) if !started.is_empty() => {
                info!("Started {} queued jobs", started.len());
            }
            Ok(_) => {}
            Err(e) => warn!("Polling queued jobs failed: {}", e),
        }
    }

    info!("Received shutdown signal");
    pool.shutdown();
    pool.wait();
    Ok(())
}

fn build_orchestrator(
    config: &Config,
    queue: Arc<dyn TaskQueue>,
) -> Result<Orchestrator, DublineError> {
    let db_path = config
        .database_path()
        .ok_or_else(|| ConfigError::Validation {
            message: "Could not determine database path".to_string(),
        })?;
    let db = Database::open(&db_path)?;

    let root = config.storage.root().ok_or_else(|| ConfigError::Validation {
        message: "Could not determine blob storage root".to_string(),
    })?;
    let mut blobs = FileBlobStore::new(&root);
    match config.storage.signing_key().map_err(ConfigError::from)? {
        Some(key) => {
            let signer = UrlSigner::from_hex_key(&key)?;
            blobs = blobs.with_signer(signer, &config.storage.public_base_url);
        }
        None => info!("No signing key configured, status output will not include download URLs"),
    }
    let blobs: Arc<dyn BlobStore> = Arc::new(blobs);

    let backend: Arc<dyn ProcessingBackend> =
        Arc::new(HttpProcessingClient::from_config(&config.processing)?);

    Ok(Orchestrator::new(
        Ledger::new(db),
        backend,
        blobs,
        queue,
        OrchestratorSettings::from_config(config),
    ))
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => error!("Failed to serialize output: {}", e),
    }
}
