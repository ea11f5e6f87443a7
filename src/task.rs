use crate::error::TaskError;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use fibre::oneshot;

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// The future a task produces once the pool admits it.
pub type TaskFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'static>>;

/// The outcome a task's handle and the global listeners observe.
pub type TaskOutcome<T, E> = Result<T, TaskError<E>>;

/// Process-unique identifier of a task, assigned when it is enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
  pub(crate) fn next() -> Self {
    TaskId(NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed))
  }

  pub fn as_u64(&self) -> u64 {
    self.0
  }
}

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A deferred unit of asynchronous work.
///
/// The wrapped operation is only called when the pool admits the task, so
/// nothing runs while the task sits in the pending queue.
pub struct Task<T, E> {
  op: Box<dyn FnOnce() -> TaskFuture<T, E> + Send + 'static>,
}

impl<T, E> Task<T, E> {
  pub fn new<F, Fut>(op: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    Self {
      op: Box::new(move || Box::pin(op()) as TaskFuture<T, E>),
    }
  }

  pub(crate) fn invoke(self) -> TaskFuture<T, E> {
    (self.op)()
  }
}

impl<T, E> fmt::Debug for Task<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task").finish_non_exhaustive()
  }
}

/// Internal representation of a task owned by the pool.
pub(crate) struct ManagedTask<T: Send + 'static, E: Send + 'static> {
  pub(crate) task_id: TaskId,
  pub(crate) task: Task<T, E>,
  pub(crate) result_sender: Option<oneshot::Sender<TaskOutcome<T, E>>>, // None for tasks seeded through the config
}

impl<T: Send + 'static, E: Send + 'static> ManagedTask<T, E> {
  pub(crate) fn new(task: Task<T, E>, result_sender: Option<oneshot::Sender<TaskOutcome<T, E>>>) -> Self {
    Self {
      task_id: TaskId::next(),
      task,
      result_sender,
    }
  }
}

impl<T: Send + 'static, E: Send + 'static> fmt::Debug for ManagedTask<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManagedTask")
      .field("task_id", &self.task_id)
      .field("has_handle", &self.result_sender.is_some())
      .finish_non_exhaustive()
  }
}

/// Message a finished task sends to the pool's coordinator.
pub(crate) struct Completion<T: Send + 'static, E: Send + 'static> {
  pub(crate) task_id: TaskId,
  pub(crate) outcome: TaskOutcome<T, E>,
  pub(crate) result_sender: Option<oneshot::Sender<TaskOutcome<T, E>>>,
}
