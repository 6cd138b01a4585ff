use crate::error::EngineError;
use crate::pool_config::{PoolConfig, PoolKind};
use crate::runner::TaskRunner;
use crate::strategy::{strategy_for, DispatchStrategy, PoolLoad};
use crate::task::TaskId;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn};

/// Defines how a pool should behave upon shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Stops accepting work and blocks until every queued and running task
  /// has finished.
  Graceful,
  /// Stops accepting work, cancels every queued task and signals running
  /// tasks' cancellation tokens. Returns without waiting.
  Cancel,
}

/// Point-in-time counters for one pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
  pub name: String,
  pub kind: PoolKind,
  pub capacity: usize,
  pub workers: usize,
  pub idle_workers: usize,
  pub running: usize,
  pub pending: usize,
  pub completed: u64,
  pub open: bool,
}

#[derive(Default)]
struct PoolState {
  queue: VecDeque<TaskRunner>,
  running: HashMap<TaskId, CancellationToken>,
  open: bool,
  workers: usize,
  /// Spawned workers that have not reached the queue yet.
  starting: usize,
  idle: usize,
  completed: u64,
  next_worker_seq: usize,
  handles: Vec<JoinHandle<()>>,
}

impl PoolState {
  fn load(&self) -> PoolLoad {
    PoolLoad {
      workers: self.workers,
      idle: self.idle + self.starting,
      pending: self.queue.len(),
    }
  }

  fn is_drained(&self) -> bool {
    self.queue.is_empty() && self.running.is_empty()
  }
}

struct PoolShared {
  name: Arc<str>,
  config: PoolConfig,
  strategy: Box<dyn DispatchStrategy>,
  state: Mutex<PoolState>,
  work_available: Condvar,
  space_available: Condvar,
  drained: Condvar,
}

/// A named group of worker threads draining one FIFO queue of task runners.
///
/// Every kind shares the same dispatch contract; the `DispatchStrategy`
/// decides how many workers exist and whether the queue is bounded. A task
/// moves to `Running` while the pool lock is held for its dequeue, so tasks
/// enqueued A before B start A before B on any number of workers.
#[derive(Clone)]
pub struct WorkerPool {
  shared: Arc<PoolShared>,
}

impl fmt::Debug for WorkerPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerPool")
      .field("name", &self.shared.name)
      .field("strategy", &self.shared.strategy)
      .finish_non_exhaustive()
  }
}

impl WorkerPool {
  pub(crate) fn new(name: &str, config: PoolConfig) -> Result<Self, EngineError> {
    config.validate(name)?;
    let strategy = strategy_for(&config);
    let shared = Arc::new(PoolShared {
      name: Arc::from(name),
      config,
      strategy,
      state: Mutex::new(PoolState {
        open: true,
        ..PoolState::default()
      }),
      work_available: Condvar::new(),
      space_available: Condvar::new(),
      drained: Condvar::new(),
    });

    {
      let mut state = shared.state.lock();
      for _ in 0..shared.strategy.initial_workers() {
        if let Err(spawn_error) = PoolShared::spawn_worker(&shared, &mut state) {
          state.open = false;
          drop(state);
          shared.work_available.notify_all();
          return Err(spawn_error);
        }
      }
    }

    info!(
      pool_name = %name,
      kind = %shared.strategy.kind(),
      capacity = shared.config.capacity,
      "Pool created with {} initial workers.",
      shared.strategy.initial_workers()
    );
    Ok(Self { shared })
  }

  pub fn name(&self) -> &str {
    &self.shared.name
  }

  pub fn kind(&self) -> PoolKind {
    self.shared.strategy.kind()
  }

  pub fn config(&self) -> &PoolConfig {
    &self.shared.config
  }

  pub fn is_open(&self) -> bool {
    self.shared.state.lock().open
  }

  /// Number of tasks currently executing on a worker.
  pub fn running_count(&self) -> usize {
    self.shared.state.lock().running.len()
  }

  /// Number of tasks waiting in the queue.
  pub fn pending_count(&self) -> usize {
    self.shared.state.lock().queue.len()
  }

  pub fn stats(&self) -> PoolStats {
    let state = self.shared.state.lock();
    PoolStats {
      name: self.shared.name.to_string(),
      kind: self.shared.strategy.kind(),
      capacity: self.shared.config.capacity,
      workers: state.workers,
      idle_workers: state.idle,
      running: state.running.len(),
      pending: state.queue.len(),
      completed: state.completed,
      open: state.open,
    }
  }

  pub(crate) fn shared_name(&self) -> Arc<str> {
    self.shared.name.clone()
  }

  /// Appends a runner to the queue. Blocks while a bounded queue is full.
  pub(crate) fn enqueue(&self, runner: TaskRunner) -> Result<(), EngineError> {
    let shared = &self.shared;
    let mut state = shared.state.lock();
    loop {
      if !state.open {
        warn!(pool_name = %shared.name, task_id = %runner.id(), "Enqueue: Pool is closed, rejecting task.");
        return Err(EngineError::PoolClosed(shared.name.to_string()));
      }
      match shared.strategy.queue_bound() {
        Some(bound) if state.queue.len() >= bound => {
          trace!(pool_name = %shared.name, "Enqueue: Queue full ({}), waiting for space.", bound);
          shared.space_available.wait(&mut state);
        }
        _ => break,
      }
    }

    trace!(pool_name = %shared.name, task_id = %runner.id(), "Enqueued task. Queue depth: {}", state.queue.len() + 1);
    state.queue.push_back(runner);

    if shared.strategy.should_grow(state.load()) {
      if let Err(spawn_error) = PoolShared::spawn_worker(shared, &mut state) {
        error!(pool_name = %shared.name, "Enqueue: Failed to grow pool: {}", spawn_error);
      }
    }
    shared.work_available.notify_one();
    Ok(())
  }

  /// Removes a queued runner. Returns `false` if it was not queued.
  pub(crate) fn discard(&self, task_id: &str) -> bool {
    let removed = {
      let mut state = self.shared.state.lock();
      let position = state.queue.iter().position(|runner| runner.id() == task_id);
      let removed = position.and_then(|index| state.queue.remove(index));
      if removed.is_some() {
        self.shared.space_available.notify_one();
        if state.is_drained() {
          self.shared.drained.notify_all();
        }
      }
      removed
    };
    // The job is dropped outside the lock; its destructor is user code.
    removed.is_some()
  }

  /// Stops accepting work. In `Cancel` mode the queued runners are handed
  /// back for finalization and running tasks' tokens are cancelled.
  pub(crate) fn close(&self, mode: ShutdownMode) -> Vec<TaskRunner> {
    let mut state = self.shared.state.lock();
    state.open = false;
    let abandoned: Vec<TaskRunner> = match mode {
      ShutdownMode::Graceful => {
        info!(pool_name = %self.shared.name, "Graceful shutdown: Allowing queued and active tasks to complete.");
        Vec::new()
      }
      ShutdownMode::Cancel => {
        info!(
          pool_name = %self.shared.name,
          "Cancel shutdown: Dropping {} queued tasks, signalling {} active tasks.",
          state.queue.len(),
          state.running.len()
        );
        for (task_id, token) in state.running.iter() {
          debug!(pool_name = %self.shared.name, %task_id, "Signalling cancellation for active task during shutdown.");
          token.cancel();
        }
        state.queue.drain(..).collect()
      }
    };
    self.shared.work_available.notify_all();
    self.shared.space_available.notify_all();
    if state.is_drained() {
      self.shared.drained.notify_all();
    }
    abandoned
  }

  /// Blocks until the queue is empty and no task is running, then joins the
  /// workers. Does nothing when called from one of this pool's own workers.
  pub(crate) fn wait_drained(&self) {
    let handles = {
      let mut state = self.shared.state.lock();
      let current = thread::current().id();
      if state.handles.iter().any(|handle| handle.thread().id() == current) {
        warn!(pool_name = %self.shared.name, "Drain requested from one of the pool's own workers; not waiting.");
        return;
      }
      while !state.is_drained() {
        trace!(pool_name = %self.shared.name, "Waiting for pool to drain.");
        self.shared.drained.wait(&mut state);
      }
      std::mem::take(&mut state.handles)
    };

    info!(pool_name = %self.shared.name, "Pool drained. Waiting for {} workers to join.", handles.len());
    for handle in handles {
      if handle.join().is_err() {
        error!(pool_name = %self.shared.name, "Error joining worker during shutdown. Worker might have panicked.");
      }
    }
  }
}

impl PoolShared {
  fn spawn_worker(shared: &Arc<PoolShared>, state: &mut PoolState) -> Result<(), EngineError> {
    let seq = state.next_worker_seq;
    let worker_shared = shared.clone();
    let handle = thread::Builder::new()
      .name(format!("{}-worker-{}", shared.name, seq))
      .spawn(move || worker_shared.run_worker(seq))
      .map_err(|spawn_error| EngineError::WorkerSpawn {
        pool: shared.name.to_string(),
        reason: spawn_error.to_string(),
      })?;

    state.next_worker_seq += 1;
    state.workers += 1;
    state.starting += 1;
    state.handles.retain(|existing| !existing.is_finished());
    state.handles.push(handle);
    trace!(pool_name = %shared.name, worker = seq, "Spawned worker. Live workers: {}", state.workers);
    Ok(())
  }

  fn run_worker(self: Arc<Self>, seq: usize) {
    let span = info_span!("pool_worker", pool_name = %self.name, worker = seq);
    let _entered = span.enter();
    debug!("Worker started.");

    let mut first = true;
    while let Some(runner) = self.next_runner(&mut first) {
      let task_id = runner.id().clone();
      let admitted = runner.admitted();
      let fault_guard = runner.fault_guard();
      let faulted = panic::catch_unwind(AssertUnwindSafe(|| runner.run())).is_err();
      if faulted {
        error!(%task_id, "Worker failed outside the task body; finalizing task as failed.");
        fault_guard.fail();
      }

      let mut state = self.state.lock();
      state.running.remove(&task_id);
      if admitted {
        state.completed += 1;
      }
      if state.is_drained() {
        self.drained.notify_all();
      }
      if faulted {
        state.workers -= 1;
        if state.open || !state.queue.is_empty() {
          if let Err(spawn_error) = PoolShared::spawn_worker(&self, &mut state) {
            error!("Failed to replace faulted worker: {}", spawn_error);
          }
        }
        return;
      }
    }
    debug!("Worker stopped.");
  }

  /// Waits for the next runner. Returns `None` when this worker should exit,
  /// having already removed itself from the live worker count.
  fn next_runner(&self, first: &mut bool) -> Option<TaskRunner> {
    let mut state = self.state.lock();
    if *first {
      state.starting -= 1;
      *first = false;
    }
    loop {
      if let Some(mut runner) = state.queue.pop_front() {
        // Lock order: pool, then task registry. The start transition happens
        // before the pool lock is released so tasks start in dequeue order.
        let admitted = runner.admit();
        state.running.insert(runner.id().clone(), runner.token());
        self.space_available.notify_one();
        trace!(task_id = %runner.id(), admitted, "Dequeued task.");
        return Some(runner);
      }
      if !state.open {
        state.workers -= 1;
        return None;
      }

      state.idle += 1;
      let timed_out = match self.strategy.idle_timeout() {
        Some(timeout) => self.work_available.wait_for(&mut state, timeout).timed_out(),
        None => {
          self.work_available.wait(&mut state);
          false
        }
      };
      state.idle -= 1;

      if timed_out && state.open && state.queue.is_empty() && self.strategy.may_retire(state.load()) {
        state.workers -= 1;
        debug!("Worker idle past timeout; retiring. Live workers: {}", state.workers);
        return None;
      }
    }
  }
}
