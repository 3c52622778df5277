use std::time::Duration;

use async_trait::async_trait;

use crate::error::WorkerError;

use super::task::{Envelope, Task, TaskId};

/// At-least-once task submission. A task with a non-zero `delay` must not
/// run before the delay has elapsed.
pub trait TaskQueue: Send + Sync {
    fn enqueue(&self, task: Task, delay: Duration) -> Result<TaskId, WorkerError>;
}

/// Consumer side of a [`TaskQueue`]. Handlers record every outcome in
/// durable state themselves; nothing is reported back to the queue.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, envelope: Envelope);
}
