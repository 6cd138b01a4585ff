use crate::engine::EngineInner;
use crate::task::{TaskId, TaskSnapshot, TaskState};

use std::sync::Arc;

use tokio::sync::watch;

/// A handle to a task submitted to the `Engine`.
///
/// Observes the task's state changes and can request its cancellation.
/// Obtained through `Engine::watch`.
#[derive(Debug, Clone)]
pub struct TaskHandle {
  pub(crate) task_id: TaskId,
  pub(crate) pool_name: Arc<str>,
  pub(crate) state_rx: watch::Receiver<TaskState>,
  pub(crate) engine: Arc<EngineInner>,
}

impl TaskHandle {
  /// Returns the unique ID of this task.
  pub fn id(&self) -> &str {
    &self.task_id
  }

  pub fn pool_name(&self) -> &str {
    &self.pool_name
  }

  /// The most recently observed state.
  pub fn state(&self) -> TaskState {
    *self.state_rx.borrow()
  }

  /// Checks if cancellation has been requested for this task.
  pub fn is_cancellation_requested(&self) -> bool {
    self
      .engine
      .tasks
      .snapshot(&self.task_id)
      .is_some_and(|snapshot| snapshot.cancel_requested)
  }

  /// Same as `Engine::cancel_task` for this task.
  pub fn cancel(&self) -> bool {
    tracing::debug!(task_id = %self.task_id, "TaskHandle: Cancellation requested.");
    self.engine.cancel_task(&self.task_id)
  }

  /// A copy of the task record, or `None` once it has been purged.
  pub fn snapshot(&self) -> Option<TaskSnapshot> {
    self.engine.tasks.snapshot(&self.task_id)
  }

  /// Resolves once the task reaches a terminal state.
  ///
  /// If the record is purged before a terminal state is observed, returns
  /// the last observed state.
  pub async fn finished(&mut self) -> TaskState {
    let observed = self.state_rx.wait_for(|state| state.is_terminal()).await.map(|state| *state);
    match observed {
      Ok(state) => state,
      Err(_) => {
        tracing::warn!(task_id = %self.task_id, "Task state channel closed before a terminal state was observed.");
        *self.state_rx.borrow()
      }
    }
  }

  /// Blocks the calling thread until the task reaches a terminal state.
  ///
  /// Must not be called from inside an async runtime worker; use
  /// [`TaskHandle::finished`] there.
  pub fn wait(&mut self) -> TaskState {
    futures::executor::block_on(self.finished())
  }
}
