use crate::config::{EngineConfig, DEFAULT_AFFINE_POOL, DEFAULT_COMPUTE_POOL, DEFAULT_DAEMON_POOL, DEFAULT_IO_POOL};
use crate::daemon::{DaemonInfo, DaemonRegistry, DaemonTask};
use crate::error::EngineError;
use crate::handle::TaskHandle;
use crate::notifier::{interest_mask, EventKind, PoolEvent, SubscriptionId, TaskEvent, ALL_INTERESTS};
use crate::pool::{PoolStats, ShutdownMode, WorkerPool};
use crate::pool_config::{PoolConfig, PoolKind};
use crate::pool_registry::PoolRegistry;
use crate::runner::{Job, TaskRunner};
use crate::task::{TaskContext, TaskError, TaskId, TaskRecord, TaskSnapshot, TaskValue};
use crate::task_table::{CancelOutcome, TaskTable};

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};
use uuid::Uuid;

#[derive(Debug)]
pub(crate) struct EngineInner {
  pub(crate) config: EngineConfig,
  pub(crate) tasks: Arc<TaskTable>,
  pub(crate) pools: PoolRegistry,
  pub(crate) daemons: DaemonRegistry,
}

fn generate_task_id(pool_name: &str) -> TaskId {
  format!("{}:{}", pool_name, Uuid::now_v7().simple())
}

impl EngineInner {
  fn submit_job(&self, pool_name: &str, explicit_id: Option<TaskId>, job: Job) -> Result<TaskId, EngineError> {
    let pool = self.pools.get(pool_name).ok_or_else(|| {
      warn!(%pool_name, "Submit: No such pool.");
      EngineError::UnknownPool(pool_name.to_string())
    })?;

    let task_id = explicit_id.unwrap_or_else(|| generate_task_id(pool_name));
    let shared_pool_name = pool.shared_name();
    let control = self
      .tasks
      .insert(TaskRecord::new(task_id.clone(), shared_pool_name.clone()))?;

    let context = TaskContext {
      task_id: task_id.clone(),
      pool_name: shared_pool_name,
      token: control.token().clone(),
    };
    let runner = TaskRunner::new(context, job, self.tasks.clone());
    if let Err(enqueue_error) = pool.enqueue(runner) {
      if self.tasks.discard_unstarted(&task_id) {
        return Err(enqueue_error);
      }
      // A cancel finalized the task while it waited for queue space.
      debug!(%pool_name, %task_id, "Task cancelled before it could be enqueued.");
      return Ok(task_id);
    }

    debug!(%pool_name, %task_id, "Submitted task.");
    Ok(task_id)
  }

  pub(crate) fn cancel_task(&self, task_id: &str) -> bool {
    if let Some(daemon) = self.daemons.get(task_id) {
      daemon.request_stop();
    }
    match self.tasks.cancel(task_id) {
      CancelOutcome::Cancelled { pool_name } => {
        if let Some(pool) = self.pools.get(&pool_name) {
          if pool.discard(task_id) {
            trace!(%task_id, %pool_name, "Removed cancelled task from its pool queue.");
          }
        }
        true
      }
      CancelOutcome::NotPending => false,
      CancelOutcome::Unknown => {
        debug!(%task_id, "Cancel: No such task.");
        false
      }
    }
  }

  fn submit_daemon<F>(&self, pool_name: &str, interval: Duration, job: F) -> Result<TaskId, EngineError>
  where
    F: FnMut(&TaskContext) -> Result<(), TaskError> + Send + 'static,
  {
    if interval.is_zero() {
      return Err(EngineError::InvalidConfig {
        pool: pool_name.to_string(),
        reason: "daemon interval must be greater than zero".to_string(),
      });
    }
    if self.pools.get(pool_name).is_none() {
      info!(%pool_name, "Creating pool for daemon tasks.");
      match self.pools.create(pool_name, PoolConfig::io(self.config.daemon_max_workers)) {
        Ok(()) | Err(EngineError::DuplicatePool(_)) => {}
        Err(create_error) => return Err(create_error),
      }
    }

    let task_id = generate_task_id(pool_name);
    let daemon = Arc::new(DaemonTask::new(task_id.clone(), pool_name, interval));
    self.daemons.insert(task_id.clone(), daemon.clone());

    let mut job = job;
    let body = move |context: &TaskContext| daemon.run_loop(context, &mut job);
    match self.submit_job(pool_name, Some(task_id.clone()), erase(body)) {
      Ok(task_id) => {
        info!(%pool_name, %task_id, ?interval, "Daemon task submitted.");
        Ok(task_id)
      }
      Err(submit_error) => {
        self.daemons.remove(&task_id);
        Err(submit_error)
      }
    }
  }

  fn stop_daemon(&self, task_id: &str, mode: ShutdownMode) -> bool {
    let Some(daemon) = self.daemons.remove(task_id) else {
      debug!(%task_id, "Stop daemon: No such daemon task.");
      return false;
    };
    daemon.request_stop();
    self.cancel_task(task_id);

    if mode == ShutdownMode::Graceful {
      if daemon.is_current_worker() {
        warn!(%task_id, "Daemon stop requested from its own loop; not waiting.");
      } else if let Some((_, mut state_rx)) = self.tasks.watch(task_id) {
        trace!(%task_id, "Waiting for daemon loop to exit.");
        let _ = futures::executor::block_on(state_rx.wait_for(|state| state.is_terminal()));
      }
    }
    info!(%task_id, pool_name = %daemon.pool_name(), "Daemon task stopped.");
    true
  }

  fn shutdown_pool(&self, name: &str, mode: ShutdownMode) -> Result<(), EngineError> {
    for task_id in self.daemons.ids_in_pool(name) {
      self.stop_daemon(&task_id, mode);
    }
    self.pools.shutdown(name, mode)
  }
}

/// The task execution engine.
///
/// Owns the pool registry and the task registry. Tasks are submitted to a
/// named pool, run asynchronously on that pool's workers, and are tracked
/// through `Pending -> Running -> {Succeeded, Failed, Cancelled}`.
///
/// Cancellation is cooperative: a task that has not started is cancelled
/// outright, a running task only sees its token cancelled.
///
/// Dropping the engine shuts every remaining pool down with
/// [`ShutdownMode::Cancel`] and does not wait for running tasks.
#[derive(Debug)]
pub struct Engine {
  inner: Arc<EngineInner>,
}

impl Engine {
  /// Creates an engine with the default configuration.
  pub fn new() -> Result<Self, EngineError> {
    Self::with_config(EngineConfig::default())
  }

  pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
    let engine = Self {
      inner: Arc::new(EngineInner {
        config: config.clone(),
        tasks: Arc::new(TaskTable::new()),
        pools: PoolRegistry::new(),
        daemons: DaemonRegistry::default(),
      }),
    };

    engine.create_pool(DEFAULT_AFFINE_POOL, PoolConfig::affine(config.affine_queue_capacity))?;
    if config.create_default_pools {
      engine.create_pool(DEFAULT_IO_POOL, PoolConfig::io(config.io_max_workers))?;
      engine.create_pool(DEFAULT_COMPUTE_POOL, PoolConfig::compute(config.compute_workers))?;
      engine.create_pool(DEFAULT_DAEMON_POOL, PoolConfig::io(config.daemon_max_workers))?;
    }
    info!("Engine initialized with pools: {:?}", engine.inner.pools.names());
    Ok(engine)
  }

  pub fn config(&self) -> &EngineConfig {
    &self.inner.config
  }

  /// Submits `job` to the pool named `pool_name` and returns the generated
  /// task id. Never waits for the job; only an affine pool with a full
  /// queue makes this call block.
  pub fn submit<F, T>(&self, pool_name: &str, job: F) -> Result<TaskId, EngineError>
  where
    F: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static,
    T: Any + Send + Sync,
  {
    self.inner.submit_job(pool_name, None, erase(job))
  }

  /// Like [`Engine::submit`] with a caller-chosen id. Fails with
  /// `EngineError::DuplicateTaskId` if the id was ever used before.
  pub fn submit_with_id<F, T>(&self, pool_name: &str, task_id: impl Into<TaskId>, job: F) -> Result<TaskId, EngineError>
  where
    F: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static,
    T: Any + Send + Sync,
  {
    self.inner.submit_job(pool_name, Some(task_id.into()), erase(job))
  }

  /// Submits to the default affine pool.
  pub fn submit_default<F, T>(&self, job: F) -> Result<TaskId, EngineError>
  where
    F: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static,
    T: Any + Send + Sync,
  {
    self.submit(DEFAULT_AFFINE_POOL, job)
  }

  /// Requests cancellation of a task.
  ///
  /// Returns `true` only if this call cancelled a task that had not started.
  /// A `false` return for a running task still cancels its token; whether
  /// that stops the task is up to the task body.
  pub fn cancel_task(&self, task_id: &str) -> bool {
    self.inner.cancel_task(task_id)
  }

  pub fn create_pool(&self, name: &str, config: PoolConfig) -> Result<(), EngineError> {
    self.inner.pools.create(name, config)
  }

  /// Shuts the pool down with `mode`. The pool's daemon tasks are stopped
  /// first, with the same mode.
  pub fn shutdown_pool(&self, name: &str, mode: ShutdownMode) -> Result<(), EngineError> {
    self.inner.shutdown_pool(name, mode)
  }

  /// Shuts every pool down with `mode`.
  pub fn shutdown(&self, mode: ShutdownMode) {
    for name in self.inner.pools.names() {
      if let Err(shutdown_error) = self.shutdown_pool(&name, mode) {
        debug!(pool_name = %name, "Shutdown skipped: {}", shutdown_error);
      }
    }
  }

  /// Runs `job` every `interval` on the default daemon pool until stopped.
  /// See [`Engine::submit_daemon_to`].
  pub fn submit_daemon<F>(&self, interval: Duration, job: F) -> Result<TaskId, EngineError>
  where
    F: FnMut(&TaskContext) -> Result<(), TaskError> + Send + 'static,
  {
    self.submit_daemon_to(DEFAULT_DAEMON_POOL, interval, job)
  }

  /// Runs `job` on `pool_name`, then again `interval` after each run, until
  /// the daemon is stopped, cancelled, or `job` returns
  /// `TaskError::Cancelled`. A run that fails or panics is recorded in
  /// [`DaemonInfo`] and does not end the loop.
  ///
  /// The daemon is an ordinary task of the pool and occupies one of its
  /// workers while it runs. A missing pool is created as an I/O pool with
  /// `EngineConfig::daemon_max_workers` workers.
  pub fn submit_daemon_to<F>(&self, pool_name: &str, interval: Duration, job: F) -> Result<TaskId, EngineError>
  where
    F: FnMut(&TaskContext) -> Result<(), TaskError> + Send + 'static,
  {
    self.inner.submit_daemon(pool_name, interval, job)
  }

  /// Stops a daemon and forgets it. With `ShutdownMode::Graceful` blocks
  /// until its current run has returned. Returns `false` for ids that are
  /// not registered daemons.
  pub fn stop_daemon(&self, task_id: &str, mode: ShutdownMode) -> bool {
    self.inner.stop_daemon(task_id, mode)
  }

  /// Stops every registered daemon.
  pub fn stop_all_daemons(&self, mode: ShutdownMode) {
    for task_id in self.inner.daemons.ids() {
      self.inner.stop_daemon(&task_id, mode);
    }
  }

  /// Registered daemons by task id.
  pub fn daemon_tasks(&self) -> HashMap<TaskId, DaemonInfo> {
    self
      .inner
      .daemons
      .all()
      .into_iter()
      .map(|(task_id, daemon)| {
        let state = self.inner.tasks.snapshot(&task_id).map(|snapshot| snapshot.state);
        let info = daemon.info(state);
        (task_id, info)
      })
      .collect()
  }

  pub fn pool(&self, name: &str) -> Option<WorkerPool> {
    self.inner.pools.get(name)
  }

  pub fn pool_stats(&self, name: &str) -> Option<PoolStats> {
    self.inner.pools.get(name).map(|pool| pool.stats())
  }

  /// Registered pools and their kinds.
  pub fn active_pools(&self) -> HashMap<String, PoolKind> {
    self.inner.pools.list()
  }

  /// Tasks that are pending or running, mapped to their pool names.
  pub fn running_tasks(&self) -> HashMap<TaskId, String> {
    self.inner.tasks.active()
  }

  pub fn task(&self, task_id: &str) -> Option<TaskSnapshot> {
    self.inner.tasks.snapshot(task_id)
  }

  pub fn watch(&self, task_id: &str) -> Option<TaskHandle> {
    let (pool_name, state_rx) = self.inner.tasks.watch(task_id)?;
    Some(TaskHandle {
      task_id: task_id.to_string(),
      pool_name,
      state_rx,
      engine: self.inner.clone(),
    })
  }

  /// Evicts records finished longer than `EngineConfig::finished_task_ttl` ago.
  pub fn purge_finished(&self) -> usize {
    self.inner.tasks.purge_finished(self.inner.config.finished_task_ttl)
  }

  pub fn on_event(&self, kind: EventKind, handler: impl Fn(&TaskEvent) + Send + Sync + 'static) -> SubscriptionId {
    self.on_events(&[kind], handler)
  }

  pub fn on_events(&self, kinds: &[EventKind], handler: impl Fn(&TaskEvent) + Send + Sync + 'static) -> SubscriptionId {
    self.inner.tasks.events().subscribe(interest_mask(kinds), handler)
  }

  pub fn on_pool_event(&self, handler: impl Fn(&PoolEvent) + Send + Sync + 'static) -> SubscriptionId {
    self.inner.pools.events().subscribe(ALL_INTERESTS, handler)
  }

  pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
    self.inner.tasks.events().unsubscribe(id) || self.inner.pools.events().unsubscribe(id)
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    let remaining = self.inner.pools.names();
    if !remaining.is_empty() {
      info!("Engine dropped. Cancelling remaining pools: {:?}", remaining);
      self.shutdown(ShutdownMode::Cancel);
    }
  }
}

fn erase<F, T>(job: F) -> Job
where
  F: FnOnce(&TaskContext) -> Result<T, TaskError> + Send + 'static,
  T: Any + Send + Sync,
{
  Box::new(move |context: &TaskContext| job(context).map(TaskValue::new))
}
