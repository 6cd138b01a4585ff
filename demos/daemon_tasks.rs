use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use task_engine::{Engine, ShutdownMode, TaskError};
use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::INFO)
    .with_target(false)
    .init();
  info!("--- Daemon Tasks Example ---");

  let engine = Engine::new().expect("Engine failed to start");

  let heartbeat = engine
    .submit_daemon(Duration::from_millis(250), |ctx| {
      info!("Heartbeat from {}", ctx.task_id());
      Ok(())
    })
    .expect("Failed to submit heartbeat daemon");

  let polls = Arc::new(AtomicU32::new(0));
  let poll_counter = polls.clone();
  let poller = engine
    .submit_daemon(Duration::from_millis(100), move |_ctx| -> Result<(), TaskError> {
      let poll = poll_counter.fetch_add(1, Ordering::SeqCst);
      if poll % 4 == 3 {
        return Err(TaskError::msg(format!("poll {} timed out", poll)));
      }
      Ok(())
    })
    .expect("Failed to submit poller daemon");

  thread::sleep(Duration::from_secs(1));
  for (task_id, info) in engine.daemon_tasks() {
    info!(
      "Daemon {} on {}: every {:?}, {} runs, {} failures, running: {}",
      task_id, info.pool_name, info.interval, info.executions, info.failures, info.running
    );
  }

  info!("Stopping heartbeat: {}", engine.stop_daemon(&heartbeat, ShutdownMode::Graceful));
  thread::sleep(Duration::from_millis(300));
  info!("Stopping remaining daemons.");
  engine.stop_all_daemons(ShutdownMode::Graceful);
  info!(
    "Poller {} ended as {} after {} polls",
    poller,
    engine.task(&poller).expect("record retained").state,
    polls.load(Ordering::SeqCst)
  );
  info!("--- Daemon Tasks Example End ---");
}
