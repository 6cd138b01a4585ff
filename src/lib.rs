//! A thread-based task execution engine with named worker pools, task
//! lifecycle tracking, cooperative cancellation, periodic daemon tasks and
//! lifecycle notifications.

mod config;
mod daemon;
mod engine;
mod error;
mod handle;
mod notifier;
mod panic_trace;
mod pool;
mod pool_config;
mod pool_registry;
mod runner;
mod strategy;
mod task;
mod task_table;

pub use config::{EngineConfig, DEFAULT_AFFINE_POOL, DEFAULT_COMPUTE_POOL, DEFAULT_DAEMON_POOL, DEFAULT_IO_POOL};
pub use daemon::DaemonInfo;
pub use engine::Engine;
pub use error::EngineError;
pub use handle::TaskHandle;
pub use notifier::{EventKind, PoolEvent, SubscriptionId, TaskEvent};
pub use pool::{PoolStats, ShutdownMode, WorkerPool};
pub use pool_config::{PoolConfig, PoolKind, DEFAULT_AFFINE_QUEUE_CAPACITY, DEFAULT_IDLE_TIMEOUT};
pub use task::{ErrorInfo, TaskContext, TaskError, TaskId, TaskSnapshot, TaskState, TaskValue};
pub use tokio_util::sync::CancellationToken;
