use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Unique identifier of a submitted task.
pub type TaskId = String;

/// Lifecycle state of a task.
///
/// `Pending -> Running -> {Succeeded, Failed, Cancelled}`, plus
/// `Pending -> Cancelled` for tasks cancelled before a worker picked them up.
/// Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
  Pending = 0,
  Running = 1,
  Succeeded = 2,
  Failed = 3,
  Cancelled = 4,
}

impl TaskState {
  pub fn is_terminal(self) -> bool {
    matches!(self, TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled)
  }

  fn from_u8(raw: u8) -> Self {
    match raw {
      0 => TaskState::Pending,
      1 => TaskState::Running,
      2 => TaskState::Succeeded,
      3 => TaskState::Failed,
      _ => TaskState::Cancelled,
    }
  }
}

impl fmt::Display for TaskState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      TaskState::Pending => "pending",
      TaskState::Running => "running",
      TaskState::Succeeded => "succeeded",
      TaskState::Failed => "failed",
      TaskState::Cancelled => "cancelled",
    };
    f.write_str(name)
  }
}

/// The value produced by a successful task, type-erased.
#[derive(Clone)]
pub struct TaskValue(Arc<dyn Any + Send + Sync>);

impl TaskValue {
  pub fn new<T: Any + Send + Sync>(value: T) -> Self {
    Self(Arc::new(value))
  }

  /// Returns the value if it is of type `T`.
  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.0.downcast_ref::<T>()
  }
}

impl fmt::Debug for TaskValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("TaskValue(..)")
  }
}

/// Description of a task failure: a human readable message plus trace text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
  pub message: String,
  pub trace: String,
}

impl ErrorInfo {
  pub fn new(message: impl Into<String>, trace: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      trace: trace.into(),
    }
  }

  /// Payload used when a worker fails outside of the task's own code.
  pub(crate) fn internal() -> Self {
    Self {
      message: "internal worker error".to_string(),
      trace: String::new(),
    }
  }
}

impl fmt::Display for ErrorInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message)
  }
}

/// Error returned by a task body.
///
/// `Cancelled` means the task observed its cancellation token and stopped;
/// the task then finalizes as `Cancelled`. Any other error finalizes it as
/// `Failed`. Every `std::error::Error` converts into `TaskError`, so task
/// bodies can use `?` directly.
#[derive(Debug)]
pub enum TaskError {
  Cancelled,
  Failed(ErrorInfo),
}

impl TaskError {
  pub fn msg(message: impl fmt::Display) -> Self {
    TaskError::Failed(ErrorInfo::new(message.to_string(), String::new()))
  }
}

impl fmt::Display for TaskError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskError::Cancelled => f.write_str("task cancelled"),
      TaskError::Failed(info) => write!(f, "task failed: {}", info.message),
    }
  }
}

impl<E> From<E> for TaskError
where
  E: std::error::Error + Send + Sync + 'static,
{
  fn from(err: E) -> Self {
    let mut trace = format!("{:?}", err);
    let mut source = err.source();
    while let Some(cause) = source {
      trace.push_str("\ncaused by: ");
      trace.push_str(&cause.to_string());
      source = cause.source();
    }
    TaskError::Failed(ErrorInfo::new(err.to_string(), trace))
  }
}

/// Handed to every task body. Carries the task's identity and its
/// cooperative cancellation token.
#[derive(Debug, Clone)]
pub struct TaskContext {
  pub(crate) task_id: TaskId,
  pub(crate) pool_name: Arc<str>,
  pub(crate) token: CancellationToken,
}

impl TaskContext {
  pub fn task_id(&self) -> &str {
    &self.task_id
  }

  pub fn pool_name(&self) -> &str {
    &self.pool_name
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// A clone of the token that is cancelled when cancellation of this task
  /// is requested.
  pub fn token(&self) -> CancellationToken {
    self.token.clone()
  }

  /// Returns `Err(TaskError::Cancelled)` once cancellation was requested.
  /// Long running bodies call this between units of work.
  pub fn checkpoint(&self) -> Result<(), TaskError> {
    if self.token.is_cancelled() {
      Err(TaskError::Cancelled)
    } else {
      Ok(())
    }
  }
}

/// State shared between the task table, the runner and any handles.
///
/// `state` only moves forward through `transition`, a single compare-and-set.
#[derive(Debug)]
pub(crate) struct TaskControl {
  state: AtomicU8,
  token: CancellationToken,
  state_tx: watch::Sender<TaskState>,
}

impl TaskControl {
  pub(crate) fn new() -> Self {
    let (state_tx, _) = watch::channel(TaskState::Pending);
    Self {
      state: AtomicU8::new(TaskState::Pending as u8),
      token: CancellationToken::new(),
      state_tx,
    }
  }

  pub(crate) fn state(&self) -> TaskState {
    TaskState::from_u8(self.state.load(AtomicOrdering::Acquire))
  }

  pub(crate) fn transition(&self, from: TaskState, to: TaskState) -> bool {
    let swapped = self
      .state
      .compare_exchange(from as u8, to as u8, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
      .is_ok();
    if swapped {
      self.state_tx.send_replace(to);
    }
    swapped
  }

  pub(crate) fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub(crate) fn cancel_requested(&self) -> bool {
    self.token.is_cancelled()
  }

  pub(crate) fn subscribe(&self) -> watch::Receiver<TaskState> {
    self.state_tx.subscribe()
  }
}

/// The engine's record of one task.
#[derive(Debug)]
pub(crate) struct TaskRecord {
  pub(crate) id: TaskId,
  pub(crate) pool_name: Arc<str>,
  pub(crate) control: Arc<TaskControl>,
  pub(crate) result: Option<TaskValue>,
  pub(crate) error: Option<ErrorInfo>,
  pub(crate) created_at: SystemTime,
  pub(crate) started_at: Option<SystemTime>,
  pub(crate) finished_at: Option<SystemTime>,
}

impl TaskRecord {
  pub(crate) fn new(id: TaskId, pool_name: Arc<str>) -> Self {
    Self {
      id,
      pool_name,
      control: Arc::new(TaskControl::new()),
      result: None,
      error: None,
      created_at: SystemTime::now(),
      started_at: None,
      finished_at: None,
    }
  }

  pub(crate) fn snapshot(&self) -> TaskSnapshot {
    TaskSnapshot {
      id: self.id.clone(),
      pool_name: self.pool_name.to_string(),
      state: self.control.state(),
      cancel_requested: self.control.cancel_requested(),
      result: self.result.clone(),
      error: self.error.clone(),
      created_at: self.created_at,
      started_at: self.started_at,
      finished_at: self.finished_at,
    }
  }
}

/// A point-in-time copy of a task record.
#[derive(Debug, Clone)]
pub struct TaskSnapshot {
  pub id: TaskId,
  pub pool_name: String,
  pub state: TaskState,
  pub cancel_requested: bool,
  pub result: Option<TaskValue>,
  pub error: Option<ErrorInfo>,
  pub created_at: SystemTime,
  pub started_at: Option<SystemTime>,
  pub finished_at: Option<SystemTime>,
}

impl TaskSnapshot {
  /// The task's result downcast to `T`, if it succeeded with a value of that type.
  pub fn result<T: Any>(&self) -> Option<&T> {
    self.result.as_ref().and_then(|value| value.downcast_ref::<T>())
  }
}
