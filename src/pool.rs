use crate::config::PoolConfig;
use crate::error::TaskError;
use crate::handle::TaskHandle;
use crate::notifier::{Listeners, Subscription};
use crate::task::{Completion, ManagedTask, Task, TaskId};
use crate::task_queue::{DrivePass, SchedulerState};

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use fibre::mpsc::{self, AsyncReceiver, AsyncSender};
use fibre::oneshot;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// A bounded-concurrency pool of asynchronous tasks.
///
/// At most `concurrency` tasks run at once; the rest wait in a FIFO queue and
/// are admitted as slots free up. Every task's outcome is reported both to
/// its own [`TaskHandle`] and to the pool-wide success/error listeners, and
/// the settled listeners fire each time the pool drains.
///
/// `TaskPool` is a cheap handle; clones share the same pool. When the last
/// handle is dropped, already admitted work (and queued work, if the pool is
/// running) still runs to completion before the pool winds down.
///
/// Listeners are owned by the pool, so a listener holding a `TaskPool` clone
/// keeps the pool alive forever. Capture a [`WeakTaskPool`] from
/// [`TaskPool::downgrade`] instead.
pub struct TaskPool<T: Send + 'static, E: Send + 'static> {
  shared: Arc<PoolShared<T, E>>,
  lifetime: Arc<PoolLifetime>,
}

impl<T: Send + 'static, E: Send + 'static> Clone for TaskPool<T, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
      lifetime: self.lifetime.clone(),
    }
  }
}

impl<T: Send + 'static, E: Send + 'static> fmt::Debug for TaskPool<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskPool")
      .field("name", &self.shared.pool_name)
      .field("state", &*self.shared.state.lock())
      .field("listeners", &self.shared.listeners)
      .finish()
  }
}

/// A non-owning reference to a [`TaskPool`], for listeners that call back into
/// their own pool.
pub struct WeakTaskPool<T: Send + 'static, E: Send + 'static> {
  shared: Weak<PoolShared<T, E>>,
  lifetime: Weak<PoolLifetime>,
}

impl<T: Send + 'static, E: Send + 'static> WeakTaskPool<T, E> {
  /// Returns the pool if at least one `TaskPool` handle is still alive.
  pub fn upgrade(&self) -> Option<TaskPool<T, E>> {
    let lifetime = self.lifetime.upgrade()?;
    let shared = self.shared.upgrade()?;
    Some(TaskPool { shared, lifetime })
  }
}

impl<T: Send + 'static, E: Send + 'static> Clone for WeakTaskPool<T, E> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
      lifetime: self.lifetime.clone(),
    }
  }
}

impl<T: Send + 'static, E: Send + 'static> fmt::Debug for WeakTaskPool<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WeakTaskPool")
      .field("alive", &(self.lifetime.strong_count() > 0))
      .finish()
  }
}

/// Signals the coordinator once every `TaskPool` handle is gone.
struct PoolLifetime {
  pool_name: Arc<String>,
  detached: CancellationToken,
}

impl Drop for PoolLifetime {
  fn drop(&mut self) {
    info!(
      pool_name = %*self.pool_name,
      "Last TaskPool handle dropped. Coordinator will wind down once in-flight work is done."
    );
    self.detached.cancel();
  }
}

/// State shared by the pool handles, the coordinator and the driving passes.
struct PoolShared<T: Send + 'static, E: Send + 'static> {
  pool_name: Arc<String>,
  runtime: TokioHandle,
  state: Mutex<SchedulerState<T, E>>,
  listeners: Listeners<T, E>,
  completion_tx: AsyncSender<Completion<T, E>>,
}

impl<T: Send + 'static, E: Send + 'static> TaskPool<T, E> {
  /// Creates a pool from `config`.
  ///
  /// If the pool starts running and the config carries initial tasks, they
  /// are admitted right away.
  ///
  /// # Panics
  /// Panics if no runtime was configured and this is called outside the
  /// context of a Tokio runtime.
  pub fn create(config: PoolConfig<T, E>) -> Self {
    let runtime = config.runtime.clone().unwrap_or_else(TokioHandle::current);
    let started = config.resolved_started();
    let PoolConfig {
      name,
      concurrency,
      tasks,
      ..
    } = config;

    if concurrency == 0 {
      warn!(pool_name = %name, "Concurrency limit of 0 requested; using 1.");
    }

    let initial: Vec<ManagedTask<T, E>> = tasks.into_iter().map(|task| ManagedTask::new(task, None)).collect();
    let has_initial_tasks = !initial.is_empty();
    let initial_count = initial.len();

    let (completion_tx, completion_rx) = mpsc::unbounded_async();
    let pool_name = Arc::new(name);
    let detached = CancellationToken::new();

    let shared = Arc::new(PoolShared {
      pool_name: pool_name.clone(),
      runtime: runtime.clone(),
      state: Mutex::new(SchedulerState::new(concurrency, started, initial)),
      listeners: Listeners::new(),
      completion_tx,
    });

    let coordinator_shared = shared.clone();
    let coordinator_detached = detached.clone();
    runtime.spawn(
      async move {
        Self::run_coordinator_loop(coordinator_shared, completion_rx, coordinator_detached).await;
      }
      .instrument(info_span!("task_pool_coordinator", pool_name = %*pool_name)),
    );

    info!(
      pool_name = %*pool_name,
      concurrency = concurrency.max(1),
      started,
      initial_tasks = initial_count,
      "Task pool created."
    );

    if started && has_initial_tasks {
      shared.drive();
    }

    Self {
      shared,
      lifetime: Arc::new(PoolLifetime { pool_name, detached }),
    }
  }

  pub fn name(&self) -> &str {
    &self.shared.pool_name
  }

  /// Creates a [`WeakTaskPool`] that does not keep the pool alive.
  pub fn downgrade(&self) -> WeakTaskPool<T, E> {
    WeakTaskPool {
      shared: Arc::downgrade(&self.shared),
      lifetime: Arc::downgrade(&self.lifetime),
    }
  }

  /// Appends a task to the tail of the queue and admits it if a slot is free.
  ///
  /// The returned handle settles with this task's own outcome. The global
  /// success/error listeners fire as well.
  pub fn add<F, Fut>(&self, op: F) -> TaskHandle<T, E>
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    self.add_task(Task::new(op))
  }

  /// Same as [`TaskPool::add`] for an already-built [`Task`].
  pub fn add_task(&self, task: Task<T, E>) -> TaskHandle<T, E> {
    let (result_tx, result_rx) = oneshot::oneshot();
    let managed = ManagedTask::new(task, Some(result_tx));
    let task_id = managed.task_id;

    debug!(pool_name = %*self.shared.pool_name, %task_id, "Adding task to pending queue.");
    self.shared.state.lock().enqueue(managed);
    self.shared.drive();

    TaskHandle {
      task_id,
      result_receiver: result_rx,
    }
  }

  /// Changes the concurrency limit for future admissions. Tasks already
  /// running are never stopped, even if they now exceed the limit.
  pub fn throttle(&self, concurrency: usize) {
    if concurrency == 0 {
      warn!(pool_name = %*self.shared.pool_name, "Throttle to 0 requested; using 1.");
    }
    let previous = {
      let mut state = self.shared.state.lock();
      let previous = state.concurrency();
      state.set_concurrency(concurrency);
      previous
    };
    info!(
      pool_name = %*self.shared.pool_name,
      previous,
      current = concurrency.max(1),
      "Concurrency limit changed."
    );
    self.shared.drive();
  }

  /// Registers a listener fired every time the pool drains (no pending and no
  /// active tasks while running).
  ///
  /// Listeners live as long as the pool. To call back into the pool from a
  /// listener, capture [`TaskPool::downgrade`] rather than a clone.
  pub fn on_settled(&self, listener: impl Fn() + Send + Sync + 'static) -> Subscription {
    self.shared.listeners.settled.add(Arc::new(listener))
  }

  /// Registers a listener fired with the error and ID of every task that fails
  /// or panics.
  pub fn on_error(&self, listener: impl Fn(&TaskError<E>, TaskId) + Send + Sync + 'static) -> Subscription {
    self.shared.listeners.error.add(Arc::new(listener))
  }

  /// Registers a listener fired with the value and ID of every task that
  /// succeeds.
  pub fn on_success(&self, listener: impl Fn(&T, TaskId) + Send + Sync + 'static) -> Subscription {
    self.shared.listeners.success.add(Arc::new(listener))
  }

  /// Halts admissions. Running tasks finish normally and still notify.
  pub fn stop(&self) {
    self.shared.state.lock().set_running(false);
    info!(pool_name = %*self.shared.pool_name, "Pool stopped. No new tasks will be admitted.");
  }

  /// Resumes admissions and immediately admits queued work.
  pub fn start(&self) {
    self.shared.state.lock().set_running(true);
    info!(pool_name = %*self.shared.pool_name, "Pool started.");
    self.shared.drive();
  }

  /// Discards every task that has not started yet and returns how many were
  /// dropped. Their handles settle with [`TaskError::Discarded`].
  pub fn clear(&self) -> usize {
    let discarded = self.shared.state.lock().clear_pending();
    let count = discarded.len();
    info!(pool_name = %*self.shared.pool_name, discarded = count, "Cleared pending queue.");
    drop(discarded);
    count
  }

  /// IDs of the running tasks, in admission order.
  pub fn active(&self) -> Vec<TaskId> {
    self.shared.state.lock().active_ids()
  }

  /// IDs of the queued tasks, head first.
  pub fn pending(&self) -> Vec<TaskId> {
    self.shared.state.lock().pending_ids()
  }

  /// Active IDs followed by pending IDs, taken from a single snapshot.
  pub fn all(&self) -> Vec<TaskId> {
    let state = self.shared.state.lock();
    let mut ids = state.active_ids();
    ids.extend(state.pending_ids());
    ids
  }

  pub fn active_count(&self) -> usize {
    self.shared.state.lock().active_len()
  }

  pub fn pending_count(&self) -> usize {
    self.shared.state.lock().pending_len()
  }

  pub fn concurrency(&self) -> usize {
    self.shared.state.lock().concurrency()
  }

  pub fn is_running(&self) -> bool {
    self.shared.state.lock().is_running()
  }

  /// True only when the pool is stopped and holds no pending or active tasks.
  ///
  /// A pool that drained while running reports `false` here even though its
  /// settled listeners have fired.
  pub fn is_settled(&self) -> bool {
    self.shared.state.lock().is_settled()
  }

  async fn run_coordinator_loop(
    shared: Arc<PoolShared<T, E>>,
    completion_rx: AsyncReceiver<Completion<T, E>>,
    detached: CancellationToken,
  ) {
    info!(pool_name = %*shared.pool_name, "Coordinator loop started.");
    let mut detach_seen = false;

    loop {
      tokio::select! {
        biased;

        recv_result = completion_rx.recv() => {
          match recv_result {
            Ok(completion) => shared.handle_completion(completion),
            Err(_) => {
              error!(pool_name = %*shared.pool_name, "Completion channel closed unexpectedly. Coordinator exiting.");
              break;
            }
          }
        }

        _ = detached.cancelled(), if !detach_seen => {
          debug!(pool_name = %*shared.pool_name, "All pool handles dropped. Serving remaining work before exit.");
          detach_seen = true;
        }
      }

      if detach_seen && shared.state.lock().is_idle() {
        break;
      }
    }

    let leftover = shared.state.lock().clear_pending();
    info!(
      pool_name = %*shared.pool_name,
      discarded = leftover.len(),
      "Coordinator loop stopped."
    );
  }
}

impl<T: Send + 'static, E: Send + 'static> PoolShared<T, E> {
  /// One driving pass: admit what fits, or report a drain.
  fn drive(&self) {
    let pass = self.state.lock().drive();
    match pass {
      DrivePass::Stopped => {
        trace!(pool_name = %*self.pool_name, "Drive: pool stopped, nothing admitted.");
      }
      DrivePass::Deferred => {
        trace!(pool_name = %*self.pool_name, "Drive: a completion is still notifying, deferring to its pass.");
      }
      DrivePass::Drained => {
        debug!(pool_name = %*self.pool_name, "Pool drained. Notifying settled listeners.");
        self.listeners.notify_settled(&self.pool_name);
      }
      DrivePass::Admitted(tasks) => {
        if tasks.is_empty() {
          trace!(pool_name = %*self.pool_name, "Drive: no free slot or nothing pending.");
        }
        for task in tasks {
          self.launch(task);
        }
      }
    }
  }

  fn launch(&self, managed: ManagedTask<T, E>) {
    let ManagedTask {
      task_id,
      task,
      result_sender,
    } = managed;
    debug!(pool_name = %*self.pool_name, %task_id, "Admitted task. Spawning.");

    let completion_tx = self.completion_tx.clone();
    let pool_name_for_task_execution = self.pool_name.clone();
    let pool_name_for_instrument_span = self.pool_name.clone();

    self.runtime.spawn(
      async move {
        let outcome = match AssertUnwindSafe(async move { task.invoke().await }).catch_unwind().await {
          Ok(Ok(value)) => {
            trace!(pool_name = %*pool_name_for_task_execution, %task_id, "Task executed successfully.");
            Ok(value)
          }
          Ok(Err(failure)) => {
            debug!(pool_name = %*pool_name_for_task_execution, %task_id, "Task failed.");
            Err(TaskError::Failed(failure))
          }
          Err(_panic_payload) => {
            error!(pool_name = %*pool_name_for_task_execution, %task_id, "Task panicked during execution.");
            Err(TaskError::Panicked)
          }
        };

        let completion = Completion {
          task_id,
          outcome,
          result_sender,
        };
        if completion_tx.send(completion).await.is_err() {
          warn!(
            pool_name = %*pool_name_for_task_execution,
            %task_id,
            "Coordinator is gone. Task outcome was not recorded."
          );
        }
      }
      .instrument(info_span!(
        "pool_task",
        pool_name = %*pool_name_for_instrument_span,
        %task_id
      )),
    );
  }

  fn handle_completion(&self, completion: Completion<T, E>) {
    let Completion {
      task_id,
      outcome,
      result_sender,
    } = completion;

    let was_active = self.state.lock().complete(task_id);
    if !was_active {
      warn!(pool_name = %*self.pool_name, %task_id, "Completion for a task that was not active.");
    }
    debug!(
      pool_name = %*self.pool_name,
      %task_id,
      success = outcome.is_ok(),
      "Task finished. Removed from active set."
    );

    self.listeners.notify_outcome(&self.pool_name, task_id, &outcome);

    if let Some(tx) = result_sender {
      if tx.send(outcome).is_err() {
        trace!(pool_name = %*self.pool_name, %task_id, "Task handle was dropped. Outcome not delivered.");
      }
    }

    if was_active {
      self.state.lock().finish_completion();
    }
    self.drive();
  }
}
