use crate::task::Task;

use std::fmt;
use std::future::Future;

use tokio::runtime::Handle as TokioHandle;

/// Concurrency limit used when none is configured.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Pool name used in logs when none is configured.
pub const DEFAULT_POOL_NAME: &str = "task_pool";

/// Configuration for `TaskPool::create`.
///
/// ```
/// use throttle_pool::PoolConfig;
///
/// let config = PoolConfig::<u32, String>::new()
///   .name("downloads")
///   .concurrency(3)
///   .started(false)
///   .task(|| async { Ok(1) });
/// ```
pub struct PoolConfig<T, E> {
  pub(crate) name: String,
  pub(crate) concurrency: usize,
  pub(crate) started: Option<bool>,
  pub(crate) tasks: Vec<Task<T, E>>,
  pub(crate) runtime: Option<TokioHandle>,
}

impl<T, E> Default for PoolConfig<T, E> {
  fn default() -> Self {
    Self {
      name: DEFAULT_POOL_NAME.to_string(),
      concurrency: DEFAULT_CONCURRENCY,
      started: None,
      tasks: Vec::new(),
      runtime: None,
    }
  }
}

impl<T, E> PoolConfig<T, E> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// Maximum number of tasks running at once. Values below 1 are raised to 1.
  pub fn concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency;
    self
  }

  /// Whether the pool admits work as soon as it is created. Defaults to `true`.
  pub fn started(mut self, started: bool) -> Self {
    self.started = Some(started);
    self
  }

  /// Appends one task to the initial queue.
  pub fn task<F, Fut>(mut self, op: F) -> Self
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
  {
    self.tasks.push(Task::new(op));
    self
  }

  /// Appends already-built tasks to the initial queue, keeping their order.
  pub fn tasks(mut self, tasks: impl IntoIterator<Item = Task<T, E>>) -> Self {
    self.tasks.extend(tasks);
    self
  }

  /// Runtime the pool spawns its tasks on. Defaults to the runtime that is
  /// current when the pool is created.
  pub fn runtime(mut self, handle: TokioHandle) -> Self {
    self.runtime = Some(handle);
    self
  }

  pub(crate) fn resolved_started(&self) -> bool {
    self.started.unwrap_or(true)
  }
}

impl<T, E> fmt::Debug for PoolConfig<T, E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PoolConfig")
      .field("name", &self.name)
      .field("concurrency", &self.concurrency)
      .field("started", &self.resolved_started())
      .field("tasks", &self.tasks.len())
      .field("runtime_set", &self.runtime.is_some())
      .finish()
  }
}
