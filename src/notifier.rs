use crate::pool_config::PoolKind;
use crate::task::{ErrorInfo, TaskId, TaskValue};

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::RwLock;
use tracing::{debug, error, trace};

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

// --- Public Event Types for Handlers ---

/// The lifecycle transitions a subscriber can register interest in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
  Started,
  Succeeded,
  Failed,
  Cancelled,
  Finished,
}

impl EventKind {
  pub const ALL: [EventKind; 5] = [
    EventKind::Started,
    EventKind::Succeeded,
    EventKind::Failed,
    EventKind::Cancelled,
    EventKind::Finished,
  ];

  fn bit(self) -> u8 {
    1 << (self as u8)
  }
}

impl fmt::Display for EventKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      EventKind::Started => "started",
      EventKind::Succeeded => "succeeded",
      EventKind::Failed => "failed",
      EventKind::Cancelled => "cancelled",
      EventKind::Finished => "finished",
    };
    f.write_str(name)
  }
}

/// One task lifecycle notification.
///
/// `result` is set only on `Succeeded`, `error` only on `Failed`.
#[derive(Debug, Clone)]
pub struct TaskEvent {
  pub kind: EventKind,
  pub task_id: TaskId,
  pub pool_name: Arc<str>,
  pub result: Option<TaskValue>,
  pub error: Option<ErrorInfo>,
  pub timestamp: SystemTime,
}

impl TaskEvent {
  pub(crate) fn new(kind: EventKind, task_id: &str, pool_name: &Arc<str>) -> Self {
    Self {
      kind,
      task_id: task_id.to_string(),
      pool_name: pool_name.clone(),
      result: None,
      error: None,
      timestamp: SystemTime::now(),
    }
  }
}

/// Pool lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
  Created { name: String, kind: PoolKind },
  Closed { name: String },
}

/// Identifies a registered handler so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
  fn next() -> Self {
    SubscriptionId(NEXT_SUBSCRIPTION_ID.fetch_add(1, AtomicOrdering::Relaxed))
  }
}

/// Events routed by a `Notifier` expose which interest bit they match.
pub(crate) trait Routable {
  fn interest_bit(&self) -> u8;
  fn describe(&self) -> String;
}

impl Routable for TaskEvent {
  fn interest_bit(&self) -> u8 {
    self.kind.bit()
  }

  fn describe(&self) -> String {
    format!("{} for task {}", self.kind, self.task_id)
  }
}

impl Routable for PoolEvent {
  fn interest_bit(&self) -> u8 {
    1
  }

  fn describe(&self) -> String {
    match self {
      PoolEvent::Created { name, kind } => format!("pool {} created ({})", name, kind),
      PoolEvent::Closed { name } => format!("pool {} closed", name),
    }
  }
}

pub(crate) fn interest_mask(kinds: &[EventKind]) -> u8 {
  kinds.iter().fold(0, |mask, kind| mask | kind.bit())
}

pub(crate) const ALL_INTERESTS: u8 = u8::MAX;

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync + 'static>;

struct Subscription<E> {
  id: SubscriptionId,
  interest: u8,
  handler: Handler<E>,
}

// --- Notifier ---

/// Delivers events to registered handlers.
///
/// Delivery happens synchronously on the publishing thread, so a given
/// publisher's events reach every handler in publication order. The handler
/// list is copied out of the lock before dispatch; handlers may subscribe or
/// unsubscribe from inside a callback.
pub(crate) struct Notifier<E> {
  subscriptions: RwLock<Vec<Subscription<E>>>,
}

impl<E> fmt::Debug for Notifier<E> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let handler_count = self.subscriptions.try_read().map_or(0, |guard| guard.len());
    f.debug_struct("Notifier").field("handler_count", &handler_count).finish()
  }
}

impl<E: Routable> Notifier<E> {
  pub(crate) fn new() -> Self {
    Self {
      subscriptions: RwLock::new(Vec::new()),
    }
  }

  pub(crate) fn subscribe(&self, interest: u8, handler: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
    let id = SubscriptionId::next();
    let mut guard = self.subscriptions.write();
    guard.push(Subscription {
      id,
      interest,
      handler: Arc::new(handler),
    });
    debug!(subscription = id.0, "Notifier: Added new handler. Total handlers: {}", guard.len());
    id
  }

  pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
    let mut guard = self.subscriptions.write();
    let before = guard.len();
    guard.retain(|sub| sub.id != id);
    before != guard.len()
  }

  pub(crate) fn publish(&self, event: &E) {
    let handlers: Vec<Handler<E>> = {
      let guard = self.subscriptions.read();
      guard
        .iter()
        .filter(|sub| sub.interest & event.interest_bit() != 0)
        .map(|sub| sub.handler.clone())
        .collect()
    };

    if handlers.is_empty() {
      trace!("No handlers registered for {}, dropping notification.", event.describe());
      return;
    }

    trace!("Dispatching {} to {} handlers.", event.describe(), handlers.len());
    for handler in handlers {
      let result = panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
      if result.is_err() {
        error!("An event handler panicked while handling {}.", event.describe());
      }
    }
  }

  pub(crate) fn publish_all(&self, events: &[E]) {
    for event in events {
      self.publish(event);
    }
  }
}
