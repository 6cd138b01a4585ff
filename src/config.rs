use crate::pool_config::DEFAULT_AFFINE_QUEUE_CAPACITY;

use std::thread;
use std::time::Duration;

/// Name of the affine pool every engine creates; the target of `Engine::submit_default`.
pub const DEFAULT_AFFINE_POOL: &str = "affine_default";
/// Name of the optional default I/O pool.
pub const DEFAULT_IO_POOL: &str = "io_default";
/// Name of the optional default compute pool.
pub const DEFAULT_COMPUTE_POOL: &str = "compute_default";
/// Name of the pool `Engine::submit_daemon` targets. Created with the other
/// default pools, or on the first daemon submitted to it.
pub const DEFAULT_DAEMON_POOL: &str = "daemon_default";

const DEFAULT_IO_MAX_WORKERS: usize = 8;
const DEFAULT_DAEMON_MAX_WORKERS: usize = 20;
const DEFAULT_FINISHED_TASK_TTL: Duration = Duration::from_secs(300);

/// Engine construction settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
  /// Queue depth of the default affine pool.
  pub affine_queue_capacity: usize,
  /// Whether `io_default` and `compute_default` are created alongside the affine pool.
  pub create_default_pools: bool,
  /// Worker ceiling of `io_default`.
  pub io_max_workers: usize,
  /// Worker count of `compute_default`.
  pub compute_workers: usize,
  /// Worker ceiling of daemon pools created by the engine. Every running
  /// daemon holds one worker.
  pub daemon_max_workers: usize,
  /// Minimum age of a finished record before `Engine::purge_finished` evicts it.
  pub finished_task_ttl: Duration,
}

impl EngineConfig {
  pub fn with_affine_queue_capacity(mut self, capacity: usize) -> Self {
    self.affine_queue_capacity = capacity;
    self
  }

  pub fn with_default_pools(mut self, enabled: bool) -> Self {
    self.create_default_pools = enabled;
    self
  }

  pub fn with_io_max_workers(mut self, workers: usize) -> Self {
    self.io_max_workers = workers;
    self
  }

  pub fn with_compute_workers(mut self, workers: usize) -> Self {
    self.compute_workers = workers;
    self
  }

  pub fn with_daemon_max_workers(mut self, workers: usize) -> Self {
    self.daemon_max_workers = workers;
    self
  }

  pub fn with_finished_task_ttl(mut self, ttl: Duration) -> Self {
    self.finished_task_ttl = ttl;
    self
  }
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      affine_queue_capacity: DEFAULT_AFFINE_QUEUE_CAPACITY,
      create_default_pools: true,
      io_max_workers: DEFAULT_IO_MAX_WORKERS,
      compute_workers: thread::available_parallelism().map_or(1, |n| n.get()),
      daemon_max_workers: DEFAULT_DAEMON_MAX_WORKERS,
      finished_task_ttl: DEFAULT_FINISHED_TASK_TTL,
    }
  }
}
