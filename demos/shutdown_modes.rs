use std::thread;
use std::time::Duration;
use task_engine::{Engine, EventKind, PoolConfig, ShutdownMode, TaskError, TaskEvent};
use tracing::info;

fn submit_batch(engine: &Engine, pool_name: &str) -> Vec<String> {
  (0..4)
    .map(|i| {
      engine
        .submit(pool_name, move |ctx| -> Result<u32, TaskError> {
          for _ in 0..5 {
            ctx.checkpoint()?;
            thread::sleep(Duration::from_millis(100));
          }
          Ok(i)
        })
        .expect("Failed to submit task")
    })
    .collect()
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Shutdown Modes Example ---");

  let engine = Engine::new().expect("Engine failed to start");
  engine.on_events(&[EventKind::Succeeded, EventKind::Cancelled], |event: &TaskEvent| {
    info!("[{}] task {} {}", event.pool_name, event.task_id, event.kind);
  });

  engine
    .create_pool("graceful_pool", PoolConfig::compute(2))
    .expect("Pool creation failed");
  let graceful = submit_batch(&engine, "graceful_pool");
  info!("Graceful shutdown: waits for all {} tasks to finish.", graceful.len());
  engine
    .shutdown_pool("graceful_pool", ShutdownMode::Graceful)
    .expect("Pool shutdown failed");
  for task_id in &graceful {
    info!("{} -> {}", task_id, engine.task(task_id).expect("record retained").state);
  }

  engine
    .create_pool("cancel_pool", PoolConfig::compute(2))
    .expect("Pool creation failed");
  let cancelled = submit_batch(&engine, "cancel_pool");
  thread::sleep(Duration::from_millis(150));
  info!("Cancel shutdown: drops queued tasks, signals running ones, returns at once.");
  engine
    .shutdown_pool("cancel_pool", ShutdownMode::Cancel)
    .expect("Pool shutdown failed");
  for task_id in &cancelled {
    let state = engine.watch(task_id).expect("task is tracked").wait();
    info!("{} -> {}", task_id, state);
  }

  info!("--- Shutdown Modes Example End ---");
}
