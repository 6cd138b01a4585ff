use std::thread;
use std::time::Duration;
use task_engine::{Engine, PoolConfig, ShutdownMode, TaskContext, TaskError};
use tracing::info;

// Checks its token between units of work, so a cancel request stops it early.
fn cooperative_work(ctx: &TaskContext, units: u32) -> Result<String, TaskError> {
  for unit in 0..units {
    ctx.checkpoint()?;
    info!("Task ({}) working on unit {}/{}", ctx.task_id(), unit + 1, units);
    thread::sleep(Duration::from_millis(200));
  }
  Ok(format!("Task ({}) finished normally.", ctx.task_id()))
}

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Individual Cancellation Example ---");

  let engine = Engine::new().expect("Engine failed to start");
  engine
    .create_pool("cancellation_pool", PoolConfig::affine(10))
    .expect("Pool creation failed");

  let running = engine
    .submit("cancellation_pool", |ctx| cooperative_work(ctx, 25))
    .expect("Failed to submit long task");
  let queued = engine
    .submit("cancellation_pool", |ctx| cooperative_work(ctx, 2))
    .expect("Failed to submit queued task");
  let survivor = engine
    .submit("cancellation_pool", |ctx| cooperative_work(ctx, 2))
    .expect("Failed to submit surviving task");

  thread::sleep(Duration::from_millis(500));

  // Not started yet: cancelled outright, its body never runs.
  info!("Cancelling queued task {}: {}", queued, engine.cancel_task(&queued));
  // Already running: only its token is cancelled; the call reports false.
  info!("Cancelling running task {}: {}", running, engine.cancel_task(&running));

  for task_id in [&running, &queued, &survivor] {
    let state = engine.watch(task_id).expect("task is tracked").wait();
    info!("Task {} ended as {}", task_id, state);
  }

  engine
    .shutdown_pool("cancellation_pool", ShutdownMode::Graceful)
    .expect("Pool shutdown failed");
  info!("--- Individual Cancellation Example End ---");
}
