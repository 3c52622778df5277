use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender,
};
use log::{debug, error, info};

use crate::error::WorkerError;

use super::queue::{TaskHandler, TaskQueue};
use super::task::{Envelope, Task, TaskId};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Scheduled {
    due: Instant,
    seq: u64,
    envelope: Envelope,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed so the max-heap pops the earliest due task first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Submission handle of a [`WorkerPool`]. Cheap to clone.
#[derive(Clone)]
pub struct PoolQueue {
    sender: Sender<Scheduled>,
    seq: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
}

impl TaskQueue for PoolQueue {
    fn enqueue(&self, task: Task, delay: Duration) -> Result<TaskId, WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        let id = TaskId::generate();
        debug!(
            "Scheduling {} for job {} as {} (delay {:?})",
            task.label(),
            task.job_id(),
            id,
            delay
        );
        let scheduled = Scheduled {
            due: Instant::now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            envelope: Envelope {
                id: id.clone(),
                task,
            },
        };
        self.sender
            .send(scheduled)
            .map_err(|_| WorkerError::ChannelClosed)?;
        Ok(id)
    }
}

/// In-process task queue: a scheduler thread holds delayed tasks until they
/// are due and hands them to a fixed set of worker threads. Each worker
/// drives the async handler on its own single-threaded runtime.
pub struct WorkerPool {
    queue: PoolQueue,
    ready_receiver: Receiver<Envelope>,
    scheduler: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
    worker_count: usize,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(worker_count: usize) -> Result<Self, WorkerError> {
        if worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }
        let (submit_sender, submit_receiver) = unbounded::<Scheduled>();
        let (ready_sender, ready_receiver) = bounded::<Envelope>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let scheduler_shutdown = Arc::clone(&shutdown);
        let scheduler = thread::Builder::new()
            .name("dubline-scheduler".to_string())
            .spawn(move || run_scheduler(submit_receiver, ready_sender, scheduler_shutdown))
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        Ok(Self {
            queue: PoolQueue {
                sender: submit_sender,
                seq: Arc::new(AtomicU64::new(0)),
                shutdown: Arc::clone(&shutdown),
            },
            ready_receiver,
            scheduler: Some(scheduler),
            workers: Vec::with_capacity(worker_count),
            worker_count,
            shutdown,
        })
    }

    pub fn queue(&self) -> PoolQueue {
        self.queue.clone()
    }

    /// Spawns the worker threads. Tasks enqueued earlier are held by the
    /// scheduler until workers are available.
    pub fn start(&mut self, handler: Arc<dyn TaskHandler>) -> Result<(), WorkerError> {
        if !self.workers.is_empty() {
            return Ok(());
        }

        for worker_id in 0..self.worker_count {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(WorkerError::Runtime)?;
            let receiver = self.ready_receiver.clone();
            let shutdown_flag = Arc::clone(&self.shutdown);
            let worker_handler = Arc::clone(&handler);

            let handle = thread::Builder::new()
                .name(format!("dubline-worker-{}", worker_id))
                .spawn(move || {
                    run_worker(worker_id, receiver, shutdown_flag, runtime, worker_handler)
                })
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
            self.workers.push(handle);
        }

        info!("Started {} workers", self.worker_count);
        Ok(())
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            if let Err(e) = scheduler.join() {
                error!("Scheduler panicked: {:?}", e);
            }
        }

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_scheduler(
    submit_receiver: Receiver<Scheduled>,
    ready_sender: Sender<Envelope>,
    shutdown: Arc<AtomicBool>,
) {
    let mut pending: BinaryHeap<Scheduled> = BinaryHeap::new();

    loop {
        if shutdown.load(Ordering::Relaxed) {
            if !pending.is_empty() {
                info!("Scheduler stopping with {} delayed tasks", pending.len());
            }
            break;
        }

        let now = Instant::now();
        let wait = pending
            .peek()
            .map(|next| next.due.saturating_duration_since(now))
            .unwrap_or(POLL_INTERVAL)
            .min(POLL_INTERVAL);

        match submit_receiver.recv_timeout(wait) {
            Ok(scheduled) => pending.push(scheduled),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if pending.is_empty() {
                    debug!("Scheduler submit channel disconnected");
                    break;
                }
                thread::sleep(wait);
            }
        }

        let now = Instant::now();
        while pending.peek().is_some_and(|next| next.due <= now) {
            let Some(scheduled) = pending.pop() else {
                break;
            };
            match ready_sender.send_timeout(scheduled.envelope, POLL_INTERVAL) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(envelope)) => {
                    // Workers are busy; keep the task at its original position.
                    pending.push(Scheduled {
                        due: scheduled.due,
                        seq: scheduled.seq,
                        envelope,
                    });
                    break;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    debug!("Scheduler ready channel disconnected");
                    return;
                }
            }
        }
    }
}

fn run_worker(
    worker_id: usize,
    receiver: Receiver<Envelope>,
    shutdown: Arc<AtomicBool>,
    runtime: tokio::runtime::Runtime,
    handler: Arc<dyn TaskHandler>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(envelope) => {
                debug!(
                    "Worker {} running task {} ({}) for job {}",
                    worker_id,
                    envelope.id,
                    envelope.task.label(),
                    envelope.task.job_id()
                );
                runtime.block_on(handler.handle(envelope));
            }
            Err(RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} task channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Stage, StagePayload};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
        done: Sender<()>,
    }

    #[async_trait]
    impl TaskHandler for Recorder {
        async fn handle(&self, envelope: Envelope) {
            self.seen
                .lock()
                .unwrap()
                .push(envelope.task.job_id().to_string());
            self.done.send(()).unwrap();
        }
    }

    fn stage_task(job_id: &str) -> Task {
        Task::RunStage {
            stage: Stage::Asr,
            payload: StagePayload::new(job_id, "s3://uploads/v1.mp4"),
        }
    }

    #[test]
    fn test_worker_pool_creation() {
        let pool = WorkerPool::new(2).unwrap();
        assert!(!pool.is_shutdown());

        pool.shutdown();
        assert!(pool.is_shutdown());
        assert!(matches!(
            pool.queue().enqueue(stage_task("j1"), Duration::ZERO),
            Err(WorkerError::ChannelClosed)
        ));

        pool.wait();
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(matches!(
            WorkerPool::new(0),
            Err(WorkerError::SpawnFailed(_))
        ));
    }

    #[test]
    fn test_delayed_task_runs_after_immediate_one() {
        let (done_tx, done_rx) = unbounded();
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            done: done_tx,
        });

        let mut pool = WorkerPool::new(1).unwrap();
        let queue = pool.queue();
        // Enqueued before the workers exist; the scheduler holds it.
        queue
            .enqueue(stage_task("late"), Duration::from_millis(300))
            .unwrap();
        queue.enqueue(stage_task("early"), Duration::ZERO).unwrap();
        pool.start(recorder.clone()).unwrap();

        let started = Instant::now();
        for _ in 0..2 {
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["early", "late"]);

        pool.shutdown();
        pool.wait();
    }
}
