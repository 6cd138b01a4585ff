use crate::error::EngineError;
use crate::notifier::{EventKind, Notifier, TaskEvent};
use crate::task::{ErrorInfo, TaskControl, TaskId, TaskRecord, TaskSnapshot, TaskState, TaskValue};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// How a task body ended.
#[derive(Debug)]
pub(crate) enum Outcome {
  Succeeded(TaskValue),
  Failed(ErrorInfo),
  Cancelled,
}

/// Result of a cancellation request against the table.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CancelOutcome {
  Unknown,
  /// This call moved the task from `Pending` to `Cancelled`.
  Cancelled { pool_name: Arc<str> },
  /// The task was running or already terminal; at most the flag was set.
  NotPending,
}

/// Result of the start transition, see [`TaskTable::begin`].
#[derive(Debug, Default)]
pub(crate) struct Admission {
  pub(crate) started: bool,
  pub(crate) events: Vec<TaskEvent>,
}

#[derive(Debug, Default)]
struct TaskRegistry {
  records: HashMap<TaskId, TaskRecord>,
  /// Ids of purged records, kept so ids stay unique for the engine's lifetime.
  retired: HashSet<TaskId>,
}

/// The engine's task registry.
///
/// Every record mutation happens while holding `registry`, and every state
/// change is a compare-and-set on the record's `TaskControl`, so the winner
/// of a cancel/start race is decided exactly once. Events are published
/// after the lock is released.
///
/// Lock order: a worker holds its pool lock while calling `begin`. Nothing
/// takes a pool lock while holding `registry`.
#[derive(Debug)]
pub(crate) struct TaskTable {
  registry: Mutex<TaskRegistry>,
  events: Notifier<TaskEvent>,
}

fn terminal_events(record: &TaskRecord, kind: EventKind) -> [TaskEvent; 2] {
  let mut terminal = TaskEvent::new(kind, &record.id, &record.pool_name);
  terminal.result = record.result.clone();
  terminal.error = record.error.clone();
  let finished = TaskEvent::new(EventKind::Finished, &record.id, &record.pool_name);
  [terminal, finished]
}

impl TaskTable {
  pub(crate) fn new() -> Self {
    Self {
      registry: Mutex::new(TaskRegistry::default()),
      events: Notifier::new(),
    }
  }

  pub(crate) fn events(&self) -> &Notifier<TaskEvent> {
    &self.events
  }

  pub(crate) fn insert(&self, record: TaskRecord) -> Result<Arc<TaskControl>, EngineError> {
    let mut registry = self.registry.lock();
    if registry.records.contains_key(&record.id) || registry.retired.contains(&record.id) {
      return Err(EngineError::DuplicateTaskId(record.id));
    }
    let control = record.control.clone();
    trace!(task_id = %record.id, pool_name = %record.pool_name, "Registered task record.");
    registry.records.insert(record.id.clone(), record);
    Ok(control)
  }

  /// Drops a record whose runner never reached a pool queue. Returns `false`
  /// when the record was already finalized by a cancellation and is kept.
  pub(crate) fn discard_unstarted(&self, task_id: &str) -> bool {
    let mut registry = self.registry.lock();
    let Some(record) = registry.records.get(task_id) else {
      return true;
    };
    if record.control.state() != TaskState::Pending {
      debug!(%task_id, state = %record.control.state(), "Task was finalized while waiting for queue space; keeping its record.");
      return false;
    }
    registry.records.remove(task_id);
    debug!(%task_id, "Discarded task record that was never enqueued.");
    true
  }

  /// Moves a task from `Pending` to `Running`. `started` is `false` when the
  /// task must not execute: it was cancelled first, or is unknown.
  ///
  /// Called by a worker while it holds its pool lock, so tasks of one pool
  /// start in dequeue order. The returned events are not published yet; the
  /// caller publishes them through [`TaskTable::publish`] once no pool lock
  /// is held.
  pub(crate) fn begin(&self, task_id: &str) -> Admission {
    let mut registry = self.registry.lock();
    let Some(record) = registry.records.get_mut(task_id) else {
      warn!(%task_id, "Runner found no record for its task.");
      return Admission::default();
    };
    if record.control.cancel_requested() && record.control.transition(TaskState::Pending, TaskState::Cancelled) {
      record.finished_at = Some(SystemTime::now());
      Admission {
        started: false,
        events: terminal_events(record, EventKind::Cancelled).to_vec(),
      }
    } else if record.control.transition(TaskState::Pending, TaskState::Running) {
      record.started_at = Some(SystemTime::now());
      Admission {
        started: true,
        events: vec![TaskEvent::new(EventKind::Started, &record.id, &record.pool_name)],
      }
    } else {
      Admission::default()
    }
  }

  pub(crate) fn publish(&self, events: &[TaskEvent]) {
    self.events.publish_all(events);
  }

  /// Finalizes a running task. A no-op if the task is no longer running.
  pub(crate) fn finish(&self, task_id: &str, outcome: Outcome) {
    let events = {
      let mut registry = self.registry.lock();
      let Some(record) = registry.records.get_mut(task_id) else {
        warn!(%task_id, "Finished task has no record.");
        return;
      };
      let (target, kind) = match &outcome {
        Outcome::Succeeded(_) => (TaskState::Succeeded, EventKind::Succeeded),
        Outcome::Failed(_) => (TaskState::Failed, EventKind::Failed),
        Outcome::Cancelled => (TaskState::Cancelled, EventKind::Cancelled),
      };
      if !record.control.transition(TaskState::Running, target) {
        warn!(%task_id, state = %record.control.state(), "Task was not running at finalization; outcome dropped.");
        return;
      }
      match outcome {
        Outcome::Succeeded(value) => record.result = Some(value),
        Outcome::Failed(info) => record.error = Some(info),
        Outcome::Cancelled => {}
      }
      record.finished_at = Some(SystemTime::now());
      debug!(%task_id, pool_name = %record.pool_name, state = %target, "Task finalized.");
      terminal_events(record, kind)
    };
    self.events.publish_all(&events);
  }

  /// Requests cancellation. Sets the cancel flag on any non-terminal task and
  /// cancels it outright if it has not started yet.
  pub(crate) fn cancel(&self, task_id: &str) -> CancelOutcome {
    let (outcome, events) = {
      let mut registry = self.registry.lock();
      let Some(record) = registry.records.get_mut(task_id) else {
        return CancelOutcome::Unknown;
      };
      if record.control.state().is_terminal() {
        trace!(%task_id, "Cancel requested for a task that already finished.");
        return CancelOutcome::NotPending;
      }
      record.control.token().cancel();
      if record.control.transition(TaskState::Pending, TaskState::Cancelled) {
        record.finished_at = Some(SystemTime::now());
        debug!(%task_id, pool_name = %record.pool_name, "Cancelled task before it started.");
        (
          CancelOutcome::Cancelled {
            pool_name: record.pool_name.clone(),
          },
          terminal_events(record, EventKind::Cancelled).to_vec(),
        )
      } else {
        debug!(%task_id, "Task already running; cancellation requested cooperatively.");
        (CancelOutcome::NotPending, Vec::new())
      }
    };
    self.events.publish_all(&events);
    outcome
  }

  /// Finalizes a task whose worker failed outside of the task body.
  pub(crate) fn fail_internal(&self, task_id: &str) {
    let events = {
      let mut registry = self.registry.lock();
      let Some(record) = registry.records.get_mut(task_id) else {
        return;
      };
      if record.control.transition(TaskState::Running, TaskState::Failed) {
        record.error = Some(ErrorInfo::internal());
        record.finished_at = Some(SystemTime::now());
        terminal_events(record, EventKind::Failed).to_vec()
      } else if record.control.transition(TaskState::Pending, TaskState::Cancelled) {
        record.control.token().cancel();
        record.finished_at = Some(SystemTime::now());
        terminal_events(record, EventKind::Cancelled).to_vec()
      } else {
        Vec::new()
      }
    };
    self.events.publish_all(&events);
  }

  pub(crate) fn snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
    self.registry.lock().records.get(task_id).map(TaskRecord::snapshot)
  }

  pub(crate) fn watch(&self, task_id: &str) -> Option<(Arc<str>, watch::Receiver<TaskState>)> {
    let registry = self.registry.lock();
    registry
      .records
      .get(task_id)
      .map(|record| (record.pool_name.clone(), record.control.subscribe()))
  }

  /// Non-terminal tasks, mapped to their pool names.
  pub(crate) fn active(&self) -> HashMap<TaskId, String> {
    let registry = self.registry.lock();
    registry
      .records
      .values()
      .filter(|record| !record.control.state().is_terminal())
      .map(|record| (record.id.clone(), record.pool_name.to_string()))
      .collect()
  }

  /// Evicts records that finished at least `ttl` ago. Returns how many were evicted.
  pub(crate) fn purge_finished(&self, ttl: Duration) -> usize {
    let mut registry = self.registry.lock();
    let expired: Vec<TaskId> = registry
      .records
      .values()
      .filter(|record| {
        record
          .finished_at
          .and_then(|finished| finished.elapsed().ok())
          .is_some_and(|age| age >= ttl)
      })
      .map(|record| record.id.clone())
      .collect();
    for task_id in &expired {
      registry.records.remove(task_id);
      registry.retired.insert(task_id.clone());
    }
    if !expired.is_empty() {
      info!("Purged {} finished task records.", expired.len());
    }
    expired.len()
  }
}
