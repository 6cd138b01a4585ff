use crate::error::EngineError;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default number of queued tasks an affine pool accepts before `submit` blocks.
pub const DEFAULT_AFFINE_QUEUE_CAPACITY: usize = 1024;
/// How long a surplus I/O worker stays idle before it retires.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// The dispatch strategy of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
  /// One consumer thread, strict submission order, bounded queue.
  Affine,
  /// Elastic worker count between a floor and a ceiling.
  IoBound,
  /// Fixed worker count.
  ComputeBound,
}

impl PoolKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      PoolKind::Affine => "affine",
      PoolKind::IoBound => "io",
      PoolKind::ComputeBound => "compute",
    }
  }
}

impl fmt::Display for PoolKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for PoolKind {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "affine" | "qt" => Ok(PoolKind::Affine),
      "io" | "iobound" | "io_bound" => Ok(PoolKind::IoBound),
      "compute" | "computebound" | "compute_bound" => Ok(PoolKind::ComputeBound),
      _ => Err(EngineError::UnknownPoolKind(s.to_string())),
    }
  }
}

/// Configuration for one pool.
///
/// `capacity` means queue depth for `Affine`, the worker ceiling for
/// `IoBound` and the worker count for `ComputeBound`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  pub kind: PoolKind,
  pub capacity: usize,
  /// Worker floor for `IoBound` pools. Ignored by the other kinds.
  pub min_workers: usize,
  /// Idle time after which a surplus `IoBound` worker retires.
  pub idle_timeout: Duration,
}

impl PoolConfig {
  pub fn affine(queue_capacity: usize) -> Self {
    Self {
      kind: PoolKind::Affine,
      capacity: queue_capacity,
      min_workers: 1,
      idle_timeout: DEFAULT_IDLE_TIMEOUT,
    }
  }

  pub fn io(max_workers: usize) -> Self {
    Self {
      kind: PoolKind::IoBound,
      capacity: max_workers,
      min_workers: 0,
      idle_timeout: DEFAULT_IDLE_TIMEOUT,
    }
  }

  pub fn compute(workers: usize) -> Self {
    Self {
      kind: PoolKind::ComputeBound,
      capacity: workers,
      min_workers: workers,
      idle_timeout: DEFAULT_IDLE_TIMEOUT,
    }
  }

  /// Builds a config from a kind name such as `"io"` or `"compute"`.
  pub fn from_kind_str(kind: &str, capacity: usize) -> Result<Self, EngineError> {
    let kind: PoolKind = kind.parse()?;
    Ok(match kind {
      PoolKind::Affine => Self::affine(capacity),
      PoolKind::IoBound => Self::io(capacity),
      PoolKind::ComputeBound => Self::compute(capacity),
    })
  }

  pub fn with_min_workers(mut self, min_workers: usize) -> Self {
    self.min_workers = min_workers;
    self
  }

  pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
    self.idle_timeout = idle_timeout;
    self
  }

  pub(crate) fn validate(&self, pool_name: &str) -> Result<(), EngineError> {
    let invalid = |reason: &str| EngineError::InvalidConfig {
      pool: pool_name.to_string(),
      reason: reason.to_string(),
    };
    if pool_name.is_empty() {
      return Err(invalid("pool name must not be empty"));
    }
    if self.capacity == 0 {
      return Err(invalid("capacity must be at least 1"));
    }
    if self.kind == PoolKind::IoBound {
      if self.min_workers > self.capacity {
        return Err(invalid("min_workers exceeds the worker ceiling"));
      }
      if self.idle_timeout.is_zero() {
        return Err(invalid("idle_timeout must be non-zero"));
      }
    }
    Ok(())
  }
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self::affine(DEFAULT_AFFINE_QUEUE_CAPACITY)
  }
}
