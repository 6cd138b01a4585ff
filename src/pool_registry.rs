use crate::error::EngineError;
use crate::notifier::{Notifier, PoolEvent};
use crate::pool::{ShutdownMode, WorkerPool};
use crate::pool_config::{PoolConfig, PoolKind};

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

/// Owns the named pools.
///
/// One lock guards the name map. It is never held while a pool drains or
/// while events are published.
#[derive(Debug)]
pub(crate) struct PoolRegistry {
  pools: Mutex<HashMap<String, WorkerPool>>,
  events: Notifier<PoolEvent>,
}

impl PoolRegistry {
  pub(crate) fn new() -> Self {
    Self {
      pools: Mutex::new(HashMap::new()),
      events: Notifier::new(),
    }
  }

  pub(crate) fn events(&self) -> &Notifier<PoolEvent> {
    &self.events
  }

  pub(crate) fn create(&self, name: &str, config: PoolConfig) -> Result<(), EngineError> {
    let kind = config.kind;
    {
      let mut pools = self.pools.lock();
      if pools.contains_key(name) {
        warn!(pool_name = %name, "Create: A pool with this name already exists.");
        return Err(EngineError::DuplicatePool(name.to_string()));
      }
      let pool = WorkerPool::new(name, config)?;
      pools.insert(name.to_string(), pool);
    }
    self.events.publish(&PoolEvent::Created {
      name: name.to_string(),
      kind,
    });
    Ok(())
  }

  pub(crate) fn get(&self, name: &str) -> Option<WorkerPool> {
    self.pools.lock().get(name).cloned()
  }

  pub(crate) fn list(&self) -> HashMap<String, PoolKind> {
    self
      .pools
      .lock()
      .iter()
      .map(|(name, pool)| (name.clone(), pool.kind()))
      .collect()
  }

  pub(crate) fn names(&self) -> Vec<String> {
    self.pools.lock().keys().cloned().collect()
  }

  /// Removes the pool from the map, closes it, and either waits for it to
  /// drain (`Graceful`) or cancels its queued work (`Cancel`).
  pub(crate) fn shutdown(&self, name: &str, mode: ShutdownMode) -> Result<(), EngineError> {
    let pool = self
      .pools
      .lock()
      .remove(name)
      .ok_or_else(|| EngineError::UnknownPool(name.to_string()))?;

    info!(pool_name = %name, "Initiating pool shutdown (mode: {:?}).", mode);
    let abandoned = pool.close(mode);
    if !abandoned.is_empty() {
      debug!(pool_name = %name, "Cancelling {} queued tasks.", abandoned.len());
    }
    for runner in abandoned {
      runner.abandon();
    }
    if mode == ShutdownMode::Graceful {
      pool.wait_drained();
    }

    info!(pool_name = %name, "Pool shutdown completed.");
    self.events.publish(&PoolEvent::Closed { name: name.to_string() });
    Ok(())
  }
}
