//! forkpool - bounded fork-based worker process pools.
//!
//! A parent process forks up to N workers, each running one invocation of a
//! task in its own address space, reaps them as they exit and fires an
//! optional completion callback once everything is done. One worker crashing
//! cannot corrupt the parent or its siblings.
//!
//! - [`FixedTaskPool`] runs the same task `cap` times at once.
//! - [`ParameterizedTaskPool`] runs a task once per [`ParamRecord`], at most
//!   `cap` workers at a time.
//!
//! Workers report back only through their exit status: 0 when the task
//! succeeded, 1 when it returned an error or panicked.

pub mod command;
pub mod config;
pub mod error;
pub mod logging;
pub mod params;
pub mod pool;

pub use config::{CapacityPolicy, Jitter, PoolConfig};
pub use error::{PoolError, Result};
pub use params::{ParamQueue, ParamRecord};
pub use pool::{
    FixedTaskPool, Forker, ParameterizedTaskPool, RunSummary, SystemForker, TerminationReason,
    WorkerExit, parse_process_count,
};
