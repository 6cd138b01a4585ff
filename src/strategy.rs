use crate::pool_config::{PoolConfig, PoolKind};

use std::fmt;
use std::time::Duration;

/// Worker and queue counts a strategy decides on.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PoolLoad {
  pub(crate) workers: usize,
  pub(crate) idle: usize,
  pub(crate) pending: usize,
}

/// The per-kind policy behind the common pool dispatch contract.
pub(crate) trait DispatchStrategy: Send + Sync + fmt::Debug {
  fn kind(&self) -> PoolKind;

  /// Workers spawned when the pool is created.
  fn initial_workers(&self) -> usize;

  /// Maximum queue depth before `enqueue` blocks. `None` means unbounded.
  fn queue_bound(&self) -> Option<usize> {
    None
  }

  /// Called after each enqueue; `true` spawns one more worker.
  fn should_grow(&self, _load: PoolLoad) -> bool {
    false
  }

  /// How long an idle worker waits before asking to retire. `None` waits forever.
  fn idle_timeout(&self) -> Option<Duration> {
    None
  }

  /// Whether an idle worker that timed out may exit.
  fn may_retire(&self, _load: PoolLoad) -> bool {
    false
  }
}

/// One consumer, strict FIFO, bounded queue.
#[derive(Debug)]
pub(crate) struct AffineStrategy {
  queue_capacity: usize,
}

impl DispatchStrategy for AffineStrategy {
  fn kind(&self) -> PoolKind {
    PoolKind::Affine
  }

  fn initial_workers(&self) -> usize {
    1
  }

  fn queue_bound(&self) -> Option<usize> {
    Some(self.queue_capacity)
  }
}

/// Grows on demand up to `max_workers`, retires idle workers down to `min_workers`.
#[derive(Debug)]
pub(crate) struct ElasticStrategy {
  min_workers: usize,
  max_workers: usize,
  idle_timeout: Duration,
}

impl DispatchStrategy for ElasticStrategy {
  fn kind(&self) -> PoolKind {
    PoolKind::IoBound
  }

  fn initial_workers(&self) -> usize {
    self.min_workers
  }

  fn should_grow(&self, load: PoolLoad) -> bool {
    load.pending > load.idle && load.workers < self.max_workers
  }

  fn idle_timeout(&self) -> Option<Duration> {
    Some(self.idle_timeout)
  }

  fn may_retire(&self, load: PoolLoad) -> bool {
    load.pending == 0 && load.workers > self.min_workers
  }
}

/// A fixed set of workers; back-pressure comes from queue depth alone.
#[derive(Debug)]
pub(crate) struct FixedStrategy {
  workers: usize,
}

impl DispatchStrategy for FixedStrategy {
  fn kind(&self) -> PoolKind {
    PoolKind::ComputeBound
  }

  fn initial_workers(&self) -> usize {
    self.workers
  }
}

pub(crate) fn strategy_for(config: &PoolConfig) -> Box<dyn DispatchStrategy> {
  match config.kind {
    PoolKind::Affine => Box::new(AffineStrategy {
      queue_capacity: config.capacity,
    }),
    PoolKind::IoBound => Box::new(ElasticStrategy {
      min_workers: config.min_workers,
      max_workers: config.capacity,
      idle_timeout: config.idle_timeout,
    }),
    PoolKind::ComputeBound => Box::new(FixedStrategy {
      workers: config.capacity,
    }),
  }
}
