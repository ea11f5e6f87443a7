use std::time::{Duration, Instant};
use throttle_pool::{PoolConfig, TaskPool};
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Throttling Example ---");

  let pool = TaskPool::<u64, String>::create(PoolConfig::new().name("throttle_pool").concurrency(1).started(false));
  let started_at = Instant::now();

  let handles: Vec<_> = (0..6u64)
    .map(|i| {
      pool.add(move || async move {
        info!("Task {} running at {:?}", i, started_at.elapsed());
        tokio::time::sleep(Duration::from_millis(300)).await;
        Ok(i)
      })
    })
    .collect();

  info!("Queued {} tasks while stopped. Starting with concurrency 1.", pool.pending_count());
  pool.start();

  tokio::time::sleep(Duration::from_millis(650)).await;
  info!("Raising concurrency to 4. Active before: {}", pool.active_count());
  pool.throttle(4);
  info!("Active after: {}", pool.active_count());

  for handle in handles {
    let id = handle.id();
    match handle.await_result().await {
      Ok(value) => info!("Task {} returned {} at {:?}", id, value, started_at.elapsed()),
      Err(e) => info!("Task {} failed: {}", id, e),
    }
  }
  info!("--- Throttling Example End ---");
}
