use std::time::Duration;
use throttle_pool::{PoolConfig, TaskPool};
use tracing::info;

async fn fetch_page(id: u32) -> Result<String, String> {
  info!("Task {} starting.", id);
  tokio::time::sleep(Duration::from_millis(100)).await;
  Ok(format!("page {} contents", id))
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Basic Usage Example ---");

  let pool = TaskPool::<String, String>::create(PoolConfig::new().name("basic_pool").concurrency(2));

  let _success = pool.on_success(|value, task_id| info!("Listener: task {} succeeded with {:?}", task_id, value));
  let _error = pool.on_error(|error, task_id| info!("Listener: task {} failed: {}", task_id, error));

  let (settled_tx, settled_rx) = tokio::sync::oneshot::channel::<()>();
  let settled_tx = parking_lot::Mutex::new(Some(settled_tx));
  let _settled = pool.on_settled(move || {
    info!("Listener: pool drained.");
    if let Some(tx) = settled_tx.lock().take() {
      let _ = tx.send(());
    }
  });

  let handles: Vec<_> = (1..=4).map(|id| pool.add(move || fetch_page(id))).collect();
  info!("Active: {:?}, pending: {:?}", pool.active(), pool.pending());

  for handle in handles {
    let task_id = handle.id();
    match handle.await_result().await {
      Ok(result) => info!("Task {} main: Received result: {}", task_id, result),
      Err(e) => info!("Task {} main: Received error: {}", task_id, e),
    }
  }

  settled_rx.await.expect("settled listener dropped");
  pool.stop();
  info!("Pool settled: {}", pool.is_settled());
  info!("--- Basic Usage Example End ---");
}
