use std::thread;
use std::time::Duration;
use task_engine::{Engine, TaskError, TaskState};
use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let engine = Engine::new().expect("Engine failed to start");

  let task_id = engine
    .submit_default(|_ctx| -> Result<String, TaskError> {
      info!("Panicking Task: Starting...");
      thread::sleep(Duration::from_millis(100));
      info!("Panicking Task: About to panic!");
      panic!("This task is designed to panic!");
    })
    .expect("Failed to submit panicking task");
  info!("Panicking task {} submitted. Awaiting result...", task_id);

  let state = engine.watch(&task_id).expect("task is tracked").wait();
  assert_eq!(state, TaskState::Failed);
  if let Some(error) = engine.task(&task_id).and_then(|snapshot| snapshot.error) {
    info!("Task {} failed: {}", task_id, error.message);
    info!("Trace:\n{}", error.trace);
  }

  let follow_up = engine
    .submit_default(|_ctx| Ok("the pool is still alive".to_string()))
    .expect("Failed to submit follow-up task");
  engine.watch(&follow_up).expect("task is tracked").wait();
  info!(
    "Follow-up task result: {:?}",
    engine.task(&follow_up).and_then(|snapshot| snapshot.result::<String>().cloned())
  );
  info!("--- Task Panic Example End ---");
}
