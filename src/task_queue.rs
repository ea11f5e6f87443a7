use crate::task::{ManagedTask, TaskId};

use std::collections::VecDeque;
use std::fmt;

/// What a single driving pass decided.
pub(crate) enum DrivePass<T: Send + 'static, E: Send + 'static> {
  /// The pool is stopped; nothing was admitted.
  Stopped,
  /// Pending and active are both empty and this drain has not been reported
  /// yet. The caller must fire the settled listeners.
  Drained,
  /// A finished task is still notifying its listeners and handle. Nothing is
  /// admitted or reported; that task's own pass runs once it is done.
  Deferred,
  /// Tasks moved from pending to active, in FIFO order. May be empty when no
  /// slot is free or this drain was already reported.
  Admitted(Vec<ManagedTask<T, E>>),
}

/// The pending queue and active set of a pool, with its admission rules.
///
/// Every method must be called under the pool's state lock: admission and
/// completion bookkeeping are one critical section.
pub(crate) struct SchedulerState<T: Send + 'static, E: Send + 'static> {
  pending: VecDeque<ManagedTask<T, E>>,
  active: Vec<TaskId>,
  concurrency: usize,
  running: bool,
  drain_reported: bool,
  // Tasks removed from `active` whose notifications have not finished yet.
  settling: usize,
}

impl<T: Send + 'static, E: Send + 'static> fmt::Debug for SchedulerState<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SchedulerState")
      .field("pending", &self.pending.len())
      .field("active", &self.active)
      .field("concurrency", &self.concurrency)
      .field("running", &self.running)
      .field("drain_reported", &self.drain_reported)
      .field("settling", &self.settling)
      .finish()
  }
}

impl<T: Send + 'static, E: Send + 'static> SchedulerState<T, E> {
  pub(crate) fn new(concurrency: usize, running: bool, initial: Vec<ManagedTask<T, E>>) -> Self {
    Self {
      pending: initial.into(),
      active: Vec::new(),
      concurrency: concurrency.max(1),
      running,
      drain_reported: false,
      settling: 0,
    }
  }

  /// Appends a task to the tail of the pending queue. A new task means the
  /// next drain is a new one and must be reported again.
  pub(crate) fn enqueue(&mut self, task: ManagedTask<T, E>) {
    self.pending.push_back(task);
    self.drain_reported = false;
  }

  /// Runs one admission pass: greedily moves the head of `pending` into
  /// `active` while a slot is free.
  pub(crate) fn drive(&mut self) -> DrivePass<T, E> {
    if !self.running {
      return DrivePass::Stopped;
    }
    if self.settling > 0 {
      return DrivePass::Deferred;
    }

    if self.pending.is_empty() && self.active.is_empty() {
      if self.drain_reported {
        return DrivePass::Admitted(Vec::new());
      }
      self.drain_reported = true;
      return DrivePass::Drained;
    }

    let mut admitted = Vec::new();
    while self.active.len() < self.concurrency {
      let Some(task) = self.pending.pop_front() else {
        break;
      };
      self.active.push(task.task_id);
      admitted.push(task);
    }
    DrivePass::Admitted(admitted)
  }

  /// Removes a finished task from the active set. Returns `false` if it was
  /// not active.
  ///
  /// Driving passes are deferred until the matching `finish_completion`, so
  /// the task's notifications always precede the next admission or drain.
  pub(crate) fn complete(&mut self, task_id: TaskId) -> bool {
    match self.active.iter().position(|id| *id == task_id) {
      Some(index) => {
        self.active.remove(index);
        self.settling += 1;
        true
      }
      None => false,
    }
  }

  /// Marks the notifications of a completed task as delivered.
  pub(crate) fn finish_completion(&mut self) {
    self.settling = self.settling.saturating_sub(1);
  }

  /// Drops every pending task and returns them.
  pub(crate) fn clear_pending(&mut self) -> Vec<ManagedTask<T, E>> {
    self.pending.drain(..).collect()
  }

  pub(crate) fn set_concurrency(&mut self, concurrency: usize) {
    self.concurrency = concurrency.max(1);
  }

  pub(crate) fn concurrency(&self) -> usize {
    self.concurrency
  }

  pub(crate) fn set_running(&mut self, running: bool) {
    self.running = running;
  }

  pub(crate) fn is_running(&self) -> bool {
    self.running
  }

  pub(crate) fn is_settled(&self) -> bool {
    !self.running && self.pending.is_empty() && self.active.is_empty() && self.settling == 0
  }

  /// True when nothing is in flight and nothing queued could still be
  /// admitted.
  pub(crate) fn is_idle(&self) -> bool {
    self.active.is_empty() && self.settling == 0 && (self.pending.is_empty() || !self.running)
  }

  pub(crate) fn active_ids(&self) -> Vec<TaskId> {
    self.active.clone()
  }

  pub(crate) fn pending_ids(&self) -> Vec<TaskId> {
    self.pending.iter().map(|task| task.task_id).collect()
  }

  pub(crate) fn active_len(&self) -> usize {
    self.active.len()
  }

  pub(crate) fn pending_len(&self) -> usize {
    self.pending.len()
  }
}
