use std::time::Duration;
use throttle_pool::{PoolConfig, TaskError, TaskPool};
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let pool = TaskPool::<String, String>::create(PoolConfig::new().name("panic_pool").concurrency(1));
  let _errors = pool.on_error(|error, task_id| info!("Error listener: task {} -> {}", task_id, error));

  let should_panic = true;
  let handle = pool.add(move || async move {
    info!("Panicking Task: Starting...");
    tokio::time::sleep(Duration::from_millis(100)).await;
    if should_panic {
      panic!("This task is designed to panic!");
    }
    Ok("This will not be returned".to_string())
  });
  let survivor = pool.add(|| async { Ok("pool still works".to_string()) });

  let task_id = handle.id();
  match handle.await_result().await {
    Ok(result) => info!("Task {} completed with UNEXPECTED result: {}", task_id, result),
    Err(TaskError::Panicked) => info!("Task {} correctly resulted in TaskError::Panicked.", task_id),
    Err(e) => info!("Task {} resulted in unexpected error: {}", task_id, e),
  }

  match survivor.await_result().await {
    Ok(result) => info!("Next task: {}", result),
    Err(e) => info!("Next task failed: {}", e),
  }
  info!("--- Task Panic Example End ---");
}
