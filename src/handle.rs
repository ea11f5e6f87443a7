use crate::error::TaskError;
use crate::task::{TaskId, TaskOutcome};

use std::fmt;

use fibre::oneshot;
use tracing;

/// A handle to a task added to a `TaskPool`.
///
/// The handle settles with this task's own outcome, independently of the
/// pool-wide success/error listeners. Dropping it does not affect the task.
pub struct TaskHandle<T: Send + 'static, E: Send + 'static> {
  pub(crate) task_id: TaskId,
  pub(crate) result_receiver: oneshot::Receiver<TaskOutcome<T, E>>,
}

impl<T: Send + 'static, E: Send + 'static> fmt::Debug for TaskHandle<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskHandle")
      .field("task_id", &self.task_id)
      .finish_non_exhaustive()
  }
}

impl<T: Send + 'static, E: Send + 'static> TaskHandle<T, E> {
  /// Returns the ID of this task, as reported to listeners and snapshots.
  pub fn id(&self) -> TaskId {
    self.task_id
  }

  /// Awaits the completion of the task.
  ///
  /// # Errors
  /// Returns `TaskError::Failed` with the task's own error if it failed.
  /// Returns `TaskError::Panicked` if the task panicked during execution.
  /// Returns `TaskError::Discarded` if the task was cleared from the pending
  /// queue, or the pool went away before running it.
  pub async fn await_result(self) -> TaskOutcome<T, E> {
    match self.result_receiver.recv().await {
      Ok(outcome) => outcome,
      Err(recv_error) => {
        // Sender dropped without a value: the task never ran.
        tracing::debug!(task_id = %self.task_id, "Result channel closed without an outcome: {}", recv_error);
        Err(TaskError::Discarded)
      }
    }
  }
}
