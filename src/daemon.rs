use crate::panic_trace::catch_task_panic;
use crate::task::{ErrorInfo, TaskContext, TaskError, TaskId, TaskState};

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

/// Point-in-time view of one periodic task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonInfo {
  pub pool_name: String,
  pub interval: Duration,
  /// When the job last completed successfully.
  pub last_execution: Option<SystemTime>,
  pub executions: u64,
  pub failures: u64,
  pub last_error: Option<ErrorInfo>,
  /// `false` once a stop was requested or the underlying task finished.
  pub running: bool,
}

#[derive(Debug, Default)]
struct DaemonProgress {
  stop_requested: bool,
  last_execution: Option<SystemTime>,
  executions: u64,
  failures: u64,
  last_error: Option<ErrorInfo>,
  worker: Option<ThreadId>,
}

/// A job re-run every `interval` on one worker of its pool until stopped.
///
/// The loop occupies its worker for its whole lifetime. A failing or
/// panicking run is recorded and the loop continues; a run returning
/// `TaskError::Cancelled`, a stop request or a cancelled token ends it, and
/// the underlying task finalizes as `Cancelled`.
#[derive(Debug)]
pub(crate) struct DaemonTask {
  task_id: TaskId,
  pool_name: String,
  interval: Duration,
  progress: Mutex<DaemonProgress>,
  wake: Condvar,
}

impl DaemonTask {
  pub(crate) fn new(task_id: TaskId, pool_name: &str, interval: Duration) -> Self {
    Self {
      task_id,
      pool_name: pool_name.to_string(),
      interval,
      progress: Mutex::new(DaemonProgress::default()),
      wake: Condvar::new(),
    }
  }

  pub(crate) fn pool_name(&self) -> &str {
    &self.pool_name
  }

  fn should_stop(&self, progress: &DaemonProgress, context: &TaskContext) -> bool {
    progress.stop_requested || context.is_cancelled()
  }

  /// The task body backing this daemon.
  pub(crate) fn run_loop<F>(&self, context: &TaskContext, job: &mut F) -> Result<(), TaskError>
  where
    F: FnMut(&TaskContext) -> Result<(), TaskError>,
  {
    self.progress.lock().worker = Some(thread::current().id());
    debug!(task_id = %self.task_id, interval = ?self.interval, "Daemon loop started.");

    loop {
      if self.should_stop(&self.progress.lock(), context) {
        debug!(task_id = %self.task_id, "Daemon loop stopping.");
        return Err(TaskError::Cancelled);
      }

      let outcome = catch_task_panic(|| job(context));
      {
        let mut progress = self.progress.lock();
        match outcome {
          Ok(Ok(())) => {
            progress.executions += 1;
            progress.last_execution = Some(SystemTime::now());
            trace!(task_id = %self.task_id, executions = progress.executions, "Daemon run completed.");
          }
          Ok(Err(TaskError::Cancelled)) => {
            debug!(task_id = %self.task_id, "Daemon job requested its own stop.");
            return Err(TaskError::Cancelled);
          }
          Ok(Err(TaskError::Failed(info))) | Err(info) => {
            warn!(task_id = %self.task_id, error = %info.message, "Daemon run failed; continuing.");
            progress.failures += 1;
            progress.last_error = Some(info);
          }
        }

        let deadline = Instant::now() + self.interval;
        while !self.should_stop(&progress, context) {
          if self.wake.wait_until(&mut progress, deadline).timed_out() {
            break;
          }
        }
      }
    }
  }

  /// Ends the loop after the current run, waking it if it is sleeping.
  pub(crate) fn request_stop(&self) {
    let mut progress = self.progress.lock();
    progress.stop_requested = true;
    self.wake.notify_all();
  }

  /// Whether the calling thread is the worker running this loop.
  pub(crate) fn is_current_worker(&self) -> bool {
    self.progress.lock().worker == Some(thread::current().id())
  }

  pub(crate) fn info(&self, task_state: Option<TaskState>) -> DaemonInfo {
    let progress = self.progress.lock();
    DaemonInfo {
      pool_name: self.pool_name.clone(),
      interval: self.interval,
      last_execution: progress.last_execution,
      executions: progress.executions,
      failures: progress.failures,
      last_error: progress.last_error.clone(),
      running: !progress.stop_requested && task_state.is_some_and(|state| !state.is_terminal()),
    }
  }
}

/// Periodic tasks by task id.
#[derive(Debug, Default)]
pub(crate) struct DaemonRegistry {
  daemons: Mutex<HashMap<TaskId, Arc<DaemonTask>>>,
}

impl DaemonRegistry {
  pub(crate) fn insert(&self, task_id: TaskId, daemon: Arc<DaemonTask>) {
    self.daemons.lock().insert(task_id, daemon);
  }

  pub(crate) fn get(&self, task_id: &str) -> Option<Arc<DaemonTask>> {
    self.daemons.lock().get(task_id).cloned()
  }

  pub(crate) fn remove(&self, task_id: &str) -> Option<Arc<DaemonTask>> {
    self.daemons.lock().remove(task_id)
  }

  pub(crate) fn ids(&self) -> Vec<TaskId> {
    self.daemons.lock().keys().cloned().collect()
  }

  pub(crate) fn ids_in_pool(&self, pool_name: &str) -> Vec<TaskId> {
    self
      .daemons
      .lock()
      .iter()
      .filter(|(_, daemon)| daemon.pool_name() == pool_name)
      .map(|(task_id, _)| task_id.clone())
      .collect()
  }

  pub(crate) fn all(&self) -> Vec<(TaskId, Arc<DaemonTask>)> {
    self
      .daemons
      .lock()
      .iter()
      .map(|(task_id, daemon)| (task_id.clone(), daemon.clone()))
      .collect()
  }
}
