use crate::config::PoolConfig;
use crate::error::TaskError;
use crate::pool::TaskPool;

use std::future::Future;
use std::sync::Arc;

use fibre::oneshot;
use parking_lot::Mutex;
use tracing::{debug, info};

const BATCH_POOL_NAME: &str = "batch_run";

/// Runs `tasks` through a single pool with at most `concurrency` running at
/// once, and returns their values in input order.
///
/// Fails with the first task failure observed, in completion order. Tasks
/// that are still running or queued at that point are not cancelled, their
/// outcomes are simply ignored.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::time::Duration;
///
/// let tasks: Vec<_> = [30u64, 10, 20]
///   .into_iter()
///   .map(|delay| move || async move {
///     tokio::time::sleep(Duration::from_millis(delay)).await;
///     Ok::<_, String>(delay)
///   })
///   .collect();
///
/// let results = throttle_pool::batch_run(tasks, 2).await;
/// assert_eq!(results, Ok(vec![30, 10, 20]));
/// # }
/// ```
pub async fn batch_run<T, E, F, Fut>(tasks: Vec<F>, concurrency: usize) -> Result<Vec<T>, TaskError<E>>
where
  T: Send + 'static,
  E: Clone + Send + 'static,
  F: FnOnce() -> Fut + Send + 'static,
  Fut: Future<Output = Result<T, E>> + Send + 'static,
{
  let task_count = tasks.len();
  let slots: Arc<Mutex<Vec<Option<T>>>> = Arc::new(Mutex::new((0..task_count).map(|_| None).collect()));
  let (outcome_tx, outcome_rx) = oneshot::oneshot::<Result<Vec<T>, TaskError<E>>>();
  let outcome_tx = Arc::new(Mutex::new(Some(outcome_tx)));

  let pool = TaskPool::<(), E>::create(
    PoolConfig::new()
      .name(BATCH_POOL_NAME)
      .concurrency(concurrency)
      .started(false),
  );

  let _settled_subscription = {
    let slots = slots.clone();
    let outcome_tx = outcome_tx.clone();
    pool.on_settled(move || {
      let Some(tx) = outcome_tx.lock().take() else {
        return;
      };
      let results: Option<Vec<T>> = std::mem::take(&mut *slots.lock()).into_iter().collect();
      let _ = tx.send(results.ok_or(TaskError::Discarded));
    })
  };

  let _error_subscription = {
    let outcome_tx = outcome_tx.clone();
    pool.on_error(move |task_error, task_id| {
      if let Some(tx) = outcome_tx.lock().take() {
        debug!(pool_name = BATCH_POOL_NAME, %task_id, "First task failure observed. Failing the batch.");
        let _ = tx.send(Err(task_error.clone()));
      }
    })
  };

  for (index, task) in tasks.into_iter().enumerate() {
    let slots = slots.clone();
    // Outcomes are collected through the listeners, not the handle.
    let _ = pool.add(move || async move {
      let value = task().await?;
      slots.lock()[index] = Some(value);
      Ok::<(), E>(())
    });
  }

  info!(pool_name = BATCH_POOL_NAME, task_count, concurrency, "Starting batch.");
  pool.start();

  match outcome_rx.recv().await {
    Ok(outcome) => outcome,
    Err(_) => Err(TaskError::Discarded),
  }
}
