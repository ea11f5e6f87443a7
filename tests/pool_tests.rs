use throttle_pool::{PoolConfig, Task, TaskError, TaskId, TaskPool};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

type BoxedFuture = std::pin::Pin<Box<dyn std::future::Future<Output = Result<u32, String>> + Send>>;

// Helper to create a task that sleeps, then returns `output_value` or fails.
fn create_task(
  task_id_for_log: usize,
  duration_ms: u64,
  output_value: u32,
  should_fail: bool,
  completion_flag: Option<Arc<AtomicBool>>, // External flag to verify the task ran to the end
) -> impl FnOnce() -> BoxedFuture + Send + 'static {
  move || -> BoxedFuture {
    Box::pin(async move {
      sleep(Duration::from_millis(duration_ms)).await;
      if let Some(flag) = completion_flag {
        flag.store(true, Ordering::SeqCst);
      }
      if should_fail {
        tracing::info!("Task {} failing as requested.", task_id_for_log);
        return Err(format!("task_{}_failed", task_id_for_log));
      }
      tracing::info!("Task {} completed successfully.", task_id_for_log);
      Ok(output_value)
    })
  }
}

// Helper to initialize tracing for tests (call once per test run, not per test function)
fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,throttle_pool=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

// Registers a settled listener that forwards every drain to a channel.
fn settled_channel(pool: &TaskPool<u32, String>) -> mpsc::UnboundedReceiver<()> {
  let (tx, rx) = mpsc::unbounded_channel();
  let _ = pool.on_settled(move || {
    let _ = tx.send(());
  });
  rx
}

async fn expect_settled(rx: &mut mpsc::UnboundedReceiver<()>) {
  timeout(Duration::from_secs(2), rx.recv())
    .await
    .expect("pool did not settle in time")
    .expect("settled channel closed");
}

#[tokio::test]
async fn test_add_and_await_basic_task() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_basic_add").concurrency(2));

  let handle = pool.add(create_task(1, 20, 11, false, None));
  assert_eq!(handle.await_result().await, Ok(11));
}

#[tokio::test]
async fn test_sequential_execution_with_concurrency_one() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_sequential").concurrency(1));
  let successes = Arc::new(parking_lot::Mutex::new(Vec::new()));
  let settled_count = Arc::new(AtomicUsize::new(0));

  {
    let successes = successes.clone();
    let _ = pool.on_success(move |value, _task_id| successes.lock().push(*value));
  }
  {
    let settled_count = settled_count.clone();
    let _ = pool.on_settled(move || {
      settled_count.fetch_add(1, Ordering::SeqCst);
    });
  }
  let mut settled_rx = settled_channel(&pool);

  let running = Arc::new(AtomicUsize::new(0));
  let max_running = Arc::new(AtomicUsize::new(0));
  for value in 1..=3u32 {
    let running = running.clone();
    let max_running = max_running.clone();
    let _ = pool.add(move || async move {
      let now = running.fetch_add(1, Ordering::SeqCst) + 1;
      max_running.fetch_max(now, Ordering::SeqCst);
      sleep(Duration::from_millis(20)).await;
      running.fetch_sub(1, Ordering::SeqCst);
      Ok(value)
    });
  }

  expect_settled(&mut settled_rx).await;
  sleep(Duration::from_millis(20)).await;

  assert_eq!(*successes.lock(), vec![1, 2, 3]);
  assert_eq!(settled_count.load(Ordering::SeqCst), 1);
  assert_eq!(max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_started_false_defers_execution_until_start() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_deferred").started(false));
  let successes = Arc::new(AtomicUsize::new(0));
  {
    let successes = successes.clone();
    let _ = pool.on_success(move |_, _| {
      successes.fetch_add(1, Ordering::SeqCst);
    });
  }
  let mut settled_rx = settled_channel(&pool);

  let ran = Arc::new(AtomicBool::new(false));
  let handle = pool.add(create_task(1, 10, 5, false, Some(ran.clone())));

  sleep(Duration::from_millis(50)).await;
  assert!(!pool.is_running());
  assert!(!ran.load(Ordering::SeqCst), "task must not run before start()");
  assert_eq!(pool.pending_count(), 1);
  assert_eq!(pool.active_count(), 0);
  assert_eq!(successes.load(Ordering::SeqCst), 0);
  assert!(settled_rx.try_recv().is_err());

  pool.start();
  assert!(pool.is_running());
  assert_eq!(handle.await_result().await, Ok(5));
  expect_settled(&mut settled_rx).await;
  assert!(ran.load(Ordering::SeqCst));
  assert_eq!(successes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_initial_tasks_from_config_run_on_create() {
  setup_tracing_for_test();
  let successes = Arc::new(parking_lot::Mutex::new(Vec::new()));

  let pool = TaskPool::<u32, String>::create(
    PoolConfig::new()
      .name("test_pool_initial_tasks")
      .concurrency(1)
      .tasks((1..=3u32).map(|v| Task::new(create_task(v as usize, 10, v * 10, false, None)))),
  );
  {
    let successes = successes.clone();
    let _ = pool.on_success(move |value, _| successes.lock().push(*value));
  }
  let mut settled_rx = settled_channel(&pool);

  assert_eq!(pool.active_count(), 1);
  assert_eq!(pool.pending_count(), 2);

  expect_settled(&mut settled_rx).await;
  assert_eq!(*successes.lock(), vec![10, 20, 30]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_active_never_exceeds_concurrency() {
  setup_tracing_for_test();
  use rand::Rng;

  let concurrency = 3;
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_limit").concurrency(concurrency));
  let mut settled_rx = settled_channel(&pool);

  let delays: Vec<u64> = {
    let mut rng = rand::rng();
    (0..20).map(|_| rng.random_range(5..25)).collect()
  };

  let running = Arc::new(AtomicUsize::new(0));
  let max_running = Arc::new(AtomicUsize::new(0));
  let mut handles = Vec::new();
  for (i, delay) in delays.into_iter().enumerate() {
    let running = running.clone();
    let max_running = max_running.clone();
    handles.push(pool.add(move || async move {
      let now = running.fetch_add(1, Ordering::SeqCst) + 1;
      max_running.fetch_max(now, Ordering::SeqCst);
      sleep(Duration::from_millis(delay)).await;
      running.fetch_sub(1, Ordering::SeqCst);
      Ok(i as u32)
    }));
    assert!(pool.active_count() <= concurrency);
  }

  for (i, handle) in handles.into_iter().enumerate() {
    assert_eq!(handle.await_result().await, Ok(i as u32));
  }
  expect_settled(&mut settled_rx).await;

  assert_eq!(max_running.load(Ordering::SeqCst), concurrency);
  assert_eq!(pool.active_count(), 0);
  assert_eq!(pool.pending_count(), 0);
}

#[tokio::test]
async fn test_fifo_admission_order() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_fifo").concurrency(2).started(false));
  let mut settled_rx = settled_channel(&pool);
  let start_order = Arc::new(parking_lot::Mutex::new(Vec::new()));

  for i in 0..6u32 {
    let start_order = start_order.clone();
    let _ = pool.add(move || async move {
      start_order.lock().push(i);
      sleep(Duration::from_millis(10)).await;
      Ok(i)
    });
  }
  pool.start();
  expect_settled(&mut settled_rx).await;

  assert_eq!(*start_order.lock(), vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_snapshots_list_active_then_pending() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_snapshots").concurrency(1));

  let h1 = pool.add(create_task(1, 100, 1, false, None));
  let h2 = pool.add(create_task(2, 10, 2, false, None));
  let h3 = pool.add(create_task(3, 10, 3, false, None));

  assert_eq!(pool.active(), vec![h1.id()]);
  assert_eq!(pool.pending(), vec![h2.id(), h3.id()]);
  assert_eq!(pool.all(), vec![h1.id(), h2.id(), h3.id()]);

  // Snapshots are copies.
  let mut snapshot: Vec<TaskId> = pool.all();
  snapshot.clear();
  assert_eq!(pool.all().len(), 3);

  assert_eq!(h3.await_result().await, Ok(3));
  assert!(pool.all().is_empty());
}

#[tokio::test]
async fn test_failing_task_does_not_block_later_tasks() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_isolation").concurrency(1));

  let failing = pool.add(create_task(1, 10, 0, true, None));
  let healthy = pool.add(create_task(2, 10, 22, false, None));

  assert_eq!(failing.await_result().await, Err(TaskError::Failed("task_1_failed".to_string())));
  assert_eq!(healthy.await_result().await, Ok(22));
}

#[tokio::test]
async fn test_task_panics_are_handled() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_panic_handling").concurrency(1));

  let should_panic = true;
  let handle_panic = pool.add(move || async move {
    sleep(Duration::from_millis(10)).await;
    if should_panic {
      panic!("Task intentionally panicked!");
    }
    Ok(0)
  });
  let handle_normal = pool.add(create_task(2, 10, 2, false, None));

  match handle_panic.await_result().await {
    Err(TaskError::Panicked) => { /* Expected */ }
    res => panic!("Expected TaskError::Panicked, got {:?}", res),
  }
  assert_eq!(handle_normal.await_result().await, Ok(2));
}

#[tokio::test]
async fn test_throttle_down_keeps_running_tasks() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_throttle_down").concurrency(3));
  let mut settled_rx = settled_channel(&pool);

  let running = Arc::new(AtomicUsize::new(0));
  let seen_by_late_tasks = Arc::new(AtomicUsize::new(0));
  let mut first_wave = Vec::new();
  for i in 0..3u32 {
    let running = running.clone();
    first_wave.push(pool.add(move || async move {
      running.fetch_add(1, Ordering::SeqCst);
      sleep(Duration::from_millis(80)).await;
      running.fetch_sub(1, Ordering::SeqCst);
      Ok(i)
    }));
  }
  assert_eq!(pool.active_count(), 3);

  pool.throttle(1);
  assert_eq!(pool.concurrency(), 1);
  assert_eq!(pool.active_count(), 3, "lowering the limit must not evict running tasks");

  for i in 3..5u32 {
    let running = running.clone();
    let seen = seen_by_late_tasks.clone();
    let _ = pool.add(move || async move {
      let now = running.fetch_add(1, Ordering::SeqCst) + 1;
      seen.fetch_max(now, Ordering::SeqCst);
      sleep(Duration::from_millis(10)).await;
      running.fetch_sub(1, Ordering::SeqCst);
      Ok(i)
    });
  }
  assert_eq!(pool.pending_count(), 2);

  for (i, handle) in first_wave.into_iter().enumerate() {
    assert_eq!(handle.await_result().await, Ok(i as u32));
  }
  expect_settled(&mut settled_rx).await;
  assert_eq!(seen_by_late_tasks.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_throttle_up_admits_immediately() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_throttle_up").concurrency(1));

  for i in 0..4 {
    let _ = pool.add(create_task(i, 100, i as u32, false, None));
  }
  assert_eq!(pool.active_count(), 1);
  assert_eq!(pool.pending_count(), 3);

  pool.throttle(3);
  assert_eq!(pool.active_count(), 3);
  assert_eq!(pool.pending_count(), 1);
}

#[tokio::test]
async fn test_throttle_to_zero_is_clamped() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_throttle_zero").concurrency(0));
  assert_eq!(pool.concurrency(), 1);
  pool.throttle(0);
  assert_eq!(pool.concurrency(), 1);

  let handle = pool.add(create_task(1, 5, 1, false, None));
  assert_eq!(handle.await_result().await, Ok(1));
}

#[tokio::test]
async fn test_clear_discards_only_pending_tasks() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_clear").concurrency(1));
  let successes = Arc::new(parking_lot::Mutex::new(Vec::new()));
  {
    let successes = successes.clone();
    let _ = pool.on_success(move |value, _| successes.lock().push(*value));
  }
  let mut settled_rx = settled_channel(&pool);

  let cleared_ran = Arc::new(AtomicBool::new(false));
  let active = pool.add(create_task(1, 50, 1, false, None));
  let queued_a = pool.add(create_task(2, 10, 2, false, Some(cleared_ran.clone())));
  let queued_b = pool.add(create_task(3, 10, 3, false, Some(cleared_ran.clone())));

  sleep(Duration::from_millis(10)).await;
  assert_eq!(pool.clear(), 2);
  assert_eq!(pool.pending_count(), 0);
  assert_eq!(pool.active_count(), 1);

  assert_eq!(active.await_result().await, Ok(1));
  assert_eq!(queued_a.await_result().await, Err(TaskError::Discarded));
  assert_eq!(queued_b.await_result().await, Err(TaskError::Discarded));
  expect_settled(&mut settled_rx).await;

  assert!(!cleared_ran.load(Ordering::SeqCst));
  assert_eq!(*successes.lock(), vec![1]);
}

#[tokio::test]
async fn test_stop_lets_active_tasks_finish_and_holds_pending() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_stop").concurrency(1));
  let mut settled_rx = settled_channel(&pool);

  let first_done = Arc::new(AtomicBool::new(false));
  let second_ran = Arc::new(AtomicBool::new(false));
  let first = pool.add(create_task(1, 40, 1, false, Some(first_done.clone())));
  let second = pool.add(create_task(2, 10, 2, false, Some(second_ran.clone())));

  pool.stop();
  assert!(!pool.is_running());
  assert_eq!(first.await_result().await, Ok(1));
  assert!(first_done.load(Ordering::SeqCst));

  sleep(Duration::from_millis(40)).await;
  assert!(!second_ran.load(Ordering::SeqCst), "stopped pool must not admit new tasks");
  assert_eq!(pool.active_count(), 0);
  assert_eq!(pool.pending_count(), 1);
  assert!(!pool.is_settled());
  assert!(settled_rx.try_recv().is_err(), "no settled event while stopped");

  pool.start();
  assert_eq!(second.await_result().await, Ok(2));
  expect_settled(&mut settled_rx).await;
}

#[tokio::test]
async fn test_is_settled_requires_stop() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_is_settled"));
  let mut settled_rx = settled_channel(&pool);

  let handle = pool.add(create_task(1, 10, 1, false, None));
  assert!(!pool.is_settled());
  assert_eq!(handle.await_result().await, Ok(1));
  expect_settled(&mut settled_rx).await;

  // Drained while running: the settled event fired but the predicate is false.
  assert!(!pool.is_settled());
  pool.stop();
  assert!(pool.is_settled());
}

#[tokio::test]
async fn test_settled_fires_once_per_drain() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_repeated_drain").concurrency(2));
  let settled_count = Arc::new(AtomicUsize::new(0));
  {
    let settled_count = settled_count.clone();
    let _ = pool.on_settled(move || {
      settled_count.fetch_add(1, Ordering::SeqCst);
    });
  }
  let mut settled_rx = settled_channel(&pool);

  let _ = pool.add(create_task(1, 10, 1, false, None));
  let _ = pool.add(create_task(2, 20, 2, false, None));
  expect_settled(&mut settled_rx).await;
  assert_eq!(settled_count.load(Ordering::SeqCst), 1);

  // Further passes without new work do not report the same drain again.
  pool.start();
  pool.throttle(3);
  assert_eq!(settled_count.load(Ordering::SeqCst), 1);

  let _ = pool.add(create_task(3, 10, 3, false, None));
  expect_settled(&mut settled_rx).await;
  sleep(Duration::from_millis(20)).await;
  assert_eq!(settled_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_start_on_empty_stopped_pool_reports_drain() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_empty_start").started(false));
  let mut settled_rx = settled_channel(&pool);

  assert!(pool.is_settled());
  pool.start();
  expect_settled(&mut settled_rx).await;
  assert!(!pool.is_settled());
}

#[tokio::test]
async fn test_dropped_handle_still_runs_task() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_dropped_handle"));
  let mut settled_rx = settled_channel(&pool);
  let ran = Arc::new(AtomicBool::new(false));

  drop(pool.add(create_task(1, 10, 1, false, Some(ran.clone()))));
  expect_settled(&mut settled_rx).await;
  assert!(ran.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_dropping_pool_lets_in_flight_work_finish() {
  setup_tracing_for_test();
  let ran = Arc::new(AtomicUsize::new(0));

  let handles = {
    let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_drop").concurrency(1));
    let mut handles = Vec::new();
    for i in 0..3u32 {
      let ran = ran.clone();
      handles.push(pool.add(move || async move {
        sleep(Duration::from_millis(10)).await;
        ran.fetch_add(1, Ordering::SeqCst);
        Ok(i)
      }));
    }
    handles
    // pool dropped here
  };

  for (i, handle) in handles.into_iter().enumerate() {
    assert_eq!(handle.await_result().await, Ok(i as u32));
  }
  assert_eq!(ran.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_dropping_stopped_pool_discards_pending() {
  setup_tracing_for_test();
  let handle = {
    let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_drop_stopped").started(false));
    pool.add(create_task(1, 10, 1, false, None))
  };

  let result = timeout(Duration::from_secs(2), handle.await_result())
    .await
    .expect("handle of a discarded task should settle");
  assert_eq!(result, Err(TaskError::Discarded));
}

#[tokio::test]
async fn test_clones_share_one_pool() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_pool_clone").concurrency(1));
  let other = pool.clone();

  let _ = pool.add(create_task(1, 50, 1, false, None));
  let handle = other.add(create_task(2, 10, 2, false, None));
  assert_eq!(pool.pending(), vec![handle.id()]);
  assert_eq!(other.name(), "test_pool_clone");

  drop(pool);
  assert_eq!(handle.await_result().await, Ok(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_throttle_during_slow_success_listener_waits_for_notifications() {
  setup_tracing_for_test();
  let pool = TaskPool::<u32, String>::create(PoolConfig::new().name("test_completion_ordering").concurrency(1));
  let order = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));

  // Holds the coordinator inside the completion's notifications.
  let _ = pool.on_success(|_, _| std::thread::sleep(Duration::from_millis(300)));
  {
    let order = order.clone();
    let _ = pool.on_success(move |value, _| order.lock().push(format!("success({})", value)));
  }
  let mut settled_rx = {
    let (tx, rx) = mpsc::unbounded_channel();
    let order = order.clone();
    let _ = pool.on_settled(move || {
      order.lock().push("settled".to_string());
      let _ = tx.send(());
    });
    rx
  };

  let handle = pool.add(|| async { Ok(7) });
  timeout(Duration::from_secs(2), async {
    while pool.active_count() > 0 {
      sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .expect("task did not leave the active set");

  // Runs a driving pass while the completion is still notifying.
  pool.throttle(2);

  assert_eq!(handle.await_result().await, Ok(7));
  expect_settled(&mut settled_rx).await;
  assert_eq!(*order.lock(), vec!["success(7)".to_string(), "settled".to_string()]);
  assert!(settled_rx.try_recv().is_err(), "settled fires once for the drain");
}
