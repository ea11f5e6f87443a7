use thiserror::Error;

/// Ways a task submitted to a `TaskPool` can end without producing a value.
///
/// `E` is the task's own failure type; it is carried through untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError<E> {
  #[error("Task failed: {0}")]
  Failed(E),

  #[error("Task panicked during execution")]
  Panicked,

  #[error("Task was discarded before it produced an outcome (cleared from the queue or pool dropped)")]
  Discarded,
}

impl<E> TaskError<E> {
  /// Returns the task's own failure value, if this is a `Failed` error.
  pub fn into_failure(self) -> Option<E> {
    match self {
      TaskError::Failed(e) => Some(e),
      _ => None,
    }
  }

  pub fn is_panic(&self) -> bool {
    matches!(self, TaskError::Panicked)
  }
}
