#![allow(dead_code)]

use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use task_engine::{Engine, EngineConfig, EventKind, TaskEvent, TaskState};

// Helper to initialize tracing for tests (Once ensures it runs once per binary).
pub fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,task_engine=trace"));
    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

/// An engine with only the default affine pool, so tests control every other pool.
pub fn bare_engine() -> Engine {
  Engine::with_config(EngineConfig::default().with_default_pools(false)).expect("engine should start")
}

/// A one-shot latch tasks can block on until the test opens it.
#[derive(Clone, Default)]
pub struct Gate {
  inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn open(&self) {
    let (lock, cvar) = &*self.inner;
    *lock.lock().unwrap() = true;
    cvar.notify_all();
  }

  pub fn wait(&self) {
    let (lock, cvar) = &*self.inner;
    let mut opened = lock.lock().unwrap();
    while !*opened {
      opened = cvar.wait(opened).unwrap();
    }
  }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if condition() {
      return true;
    }
    thread::sleep(Duration::from_millis(5));
  }
  condition()
}

pub fn wait_for_state(engine: &Engine, task_id: &str, state: TaskState) -> bool {
  wait_until(Duration::from_secs(5), || {
    engine.task(task_id).map(|snapshot| snapshot.state) == Some(state)
  })
}

pub type CollectedEvents = Arc<Mutex<Vec<(String, EventKind)>>>;

// Helper for collecting notifications in tests
pub fn collect_all_events(engine: &Engine) -> CollectedEvents {
  let collected: CollectedEvents = Arc::new(Mutex::new(Vec::new()));
  let sink = collected.clone();
  engine.on_events(&EventKind::ALL, move |event: &TaskEvent| {
    tracing::debug!("Test collecting handler: {} for task {}", event.kind, event.task_id);
    sink.lock().unwrap().push((event.task_id.clone(), event.kind));
  });
  collected
}

pub fn events_for(collected: &CollectedEvents, task_id: &str) -> Vec<EventKind> {
  collected
    .lock()
    .unwrap()
    .iter()
    .filter(|(id, _)| id == task_id)
    .map(|(_, kind)| *kind)
    .collect()
}
