//! A Tokio-based bounded-concurrency task pool with FIFO admission,
//! throttling, start/stop control, and success/error/settled listeners.

mod batch;
mod config;
mod error;
mod handle;
mod notifier;
mod pool;
mod task;
mod task_queue;

pub use batch::batch_run;
pub use config::{PoolConfig, DEFAULT_CONCURRENCY, DEFAULT_POOL_NAME};
pub use error::TaskError;
pub use handle::TaskHandle;
pub use notifier::Subscription;
pub use pool::{TaskPool, WeakTaskPool};
pub use task::{Task, TaskFuture, TaskId, TaskOutcome};
