use std::time::Duration;
use throttle_pool::batch_run;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();

  info!("--- Batch Run Example ---");

  let delays = [300u64, 100, 200, 50];
  let tasks: Vec<_> = delays
    .into_iter()
    .map(|delay| {
      move || async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        info!("Task with delay {}ms finished.", delay);
        Ok::<_, String>(delay)
      }
    })
    .collect();

  match batch_run(tasks, 2).await {
    Ok(results) => info!("Results in input order: {:?}", results),
    Err(e) => info!("Batch failed: {}", e),
  }

  let failing: Vec<_> = [(100u64, false), (20, true), (200, false)]
    .into_iter()
    .map(|(delay, fail)| {
      move || async move {
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if fail {
          Err(format!("task with delay {}ms failed", delay))
        } else {
          Ok(delay)
        }
      }
    })
    .collect();

  match batch_run(failing, 3).await {
    Ok(results) => info!("Unexpected success: {:?}", results),
    Err(e) => info!("Batch failed as expected: {}", e),
  }
  info!("--- Batch Run Example End ---");
}
