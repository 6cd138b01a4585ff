use thiserror::Error;

/// Errors reported by the engine when a requested operation did not happen.
///
/// None of these abort the caller; they describe configuration mistakes
/// (unknown or duplicate names) and work rejected by a closing pool.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
  #[error("No pool named '{0}' is registered")]
  UnknownPool(String),

  #[error("A pool named '{0}' is already registered")]
  DuplicatePool(String),

  #[error("Unrecognized pool kind '{0}'")]
  UnknownPoolKind(String),

  #[error("Invalid pool configuration for '{pool}': {reason}")]
  InvalidConfig { pool: String, reason: String },

  #[error("Task id '{0}' is already in use")]
  DuplicateTaskId(String),

  #[error("Pool '{0}' is shutting down or already shut down, cannot accept new tasks")]
  PoolClosed(String),

  #[error("Failed to spawn a worker thread for pool '{pool}': {reason}")]
  WorkerSpawn { pool: String, reason: String },
}
