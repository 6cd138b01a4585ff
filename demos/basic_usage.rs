use std::thread;
use std::time::Duration;
use task_engine::{Engine, PoolConfig, ShutdownMode, TaskHandle, TaskState};
use tracing::info;

fn my_task_fn(id: usize, delay_ms: u64) -> String {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  thread::sleep(Duration::from_millis(delay_ms));
  let result = format!("Task {} finished successfully after {}ms", id, delay_ms);
  info!("{}", result);
  result
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let engine = Engine::new().expect("Engine failed to start");
  let pool_name = "basic_pool";
  engine
    .create_pool(pool_name, PoolConfig::compute(2))
    .expect("Pool creation failed");

  let mut handles: Vec<TaskHandle> = Vec::new();
  for i in 0..5 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 500 + (i as u64 % 3 * 250);
    match engine.submit(pool_name, move |_ctx| Ok(my_task_fn(i, sleep_duration))) {
      Ok(task_id) => {
        info!("Submitted task {} with id {}", i, task_id);
        handles.extend(engine.watch(&task_id));
      }
      Err(e) => tracing::error!("Failed to submit task {}: {}", i, e),
    }
  }

  info!("All tasks submitted. Awaiting results...");
  for mut handle in handles {
    match handle.finished().await {
      TaskState::Succeeded => {
        let snapshot = handle.snapshot().expect("record is retained");
        info!("Result for task {}: {:?}", handle.id(), snapshot.result::<String>());
      }
      other => info!("Task {} ended as {}", handle.id(), other),
    }
  }

  info!("All task results processed. Shutting down pool.");
  engine
    .shutdown_pool(pool_name, ShutdownMode::Graceful)
    .expect("Pool shutdown failed");
  info!("Pool shutdown complete.");
  info!("--- Basic Usage Example End ---");
}
