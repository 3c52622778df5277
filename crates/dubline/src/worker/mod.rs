pub mod pool;
pub mod queue;
pub mod task;

pub use pool::{PoolQueue, WorkerPool};
pub use queue::{TaskHandler, TaskQueue};
pub use task::{Envelope, Task, TaskId};
