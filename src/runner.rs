use crate::panic_trace::catch_task_panic;
use crate::task::{TaskContext, TaskError, TaskId, TaskValue};
use crate::task_table::{Admission, Outcome, TaskTable};

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, trace};

/// The type-erased task body a runner executes.
pub(crate) type Job = Box<dyn FnOnce(&TaskContext) -> Result<TaskValue, TaskError> + Send + 'static>;

/// Executable wrapper around one submitted job.
///
/// Owns the job, shares the task's control block through the table, and
/// performs the start/finish transitions around the call.
pub(crate) struct TaskRunner {
  context: TaskContext,
  job: Job,
  table: Arc<TaskTable>,
  admission: Admission,
  /// Panics outside the task body once the body returned.
  #[cfg(test)]
  pub(crate) fault_after_body: bool,
}

impl fmt::Debug for TaskRunner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TaskRunner")
      .field("task_id", &self.context.task_id)
      .field("pool_name", &self.context.pool_name)
      .finish_non_exhaustive()
  }
}

impl TaskRunner {
  pub(crate) fn new(context: TaskContext, job: Job, table: Arc<TaskTable>) -> Self {
    Self {
      context,
      job,
      table,
      admission: Admission::default(),
      #[cfg(test)]
      fault_after_body: false,
    }
  }

  pub(crate) fn id(&self) -> &TaskId {
    &self.context.task_id
  }

  pub(crate) fn token(&self) -> CancellationToken {
    self.context.token.clone()
  }

  /// Lets a worker finalize this runner's task if the worker itself fails
  /// after `run` has consumed the runner.
  pub(crate) fn fault_guard(&self) -> FaultGuard {
    FaultGuard {
      task_id: self.context.task_id.clone(),
      table: self.table.clone(),
    }
  }

  /// Performs the `Pending -> Running` transition. Workers call this while
  /// holding their pool lock, right after dequeuing the runner.
  pub(crate) fn admit(&mut self) -> bool {
    self.admission = self.table.begin(&self.context.task_id);
    self.admission.started
  }

  pub(crate) fn admitted(&self) -> bool {
    self.admission.started
  }

  /// Publishes the start transition's events and runs the job if the task
  /// was admitted.
  ///
  /// Faults raised by the job (errors and panics) are captured into the task
  /// record and never unwind into the worker.
  pub(crate) fn run(self) {
    let span = info_span!("task", task_id = %self.context.task_id, pool_name = %self.context.pool_name);
    let _entered = span.enter();

    #[cfg(test)]
    let fault_after_body = self.fault_after_body;
    let Self {
      context,
      job,
      table,
      admission,
      ..
    } = self;

    table.publish(&admission.events);
    if !admission.started {
      debug!("Task no longer pending at dequeue; skipping execution.");
      return;
    }
    trace!("Task started.");

    let outcome = match catch_task_panic(|| job(&context)) {
      Ok(Ok(value)) => Outcome::Succeeded(value),
      Ok(Err(TaskError::Cancelled)) => {
        debug!("Task observed its cancellation token and stopped.");
        Outcome::Cancelled
      }
      Ok(Err(TaskError::Failed(info))) => {
        debug!(error = %info.message, "Task returned an error.");
        Outcome::Failed(info)
      }
      Err(info) => {
        error!(error = %info.message, "Task panicked during execution.");
        Outcome::Failed(info)
      }
    };

    #[cfg(test)]
    if fault_after_body {
      panic!("injected worker fault");
    }

    if context.token.is_cancelled() {
      trace!("Cancellation was requested while running; keeping the actual outcome.");
    }
    table.finish(&context.task_id, outcome);
  }

  /// Finalizes a still-pending task as `Cancelled` without running it.
  pub(crate) fn abandon(self) {
    self.table.cancel(&self.context.task_id);
  }
}

/// See [`TaskRunner::fault_guard`].
#[derive(Debug)]
pub(crate) struct FaultGuard {
  task_id: TaskId,
  table: Arc<TaskTable>,
}

impl FaultGuard {
  pub(crate) fn fail(self) {
    self.table.fail_internal(&self.task_id);
  }
}
