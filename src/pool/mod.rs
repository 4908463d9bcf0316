//! Fork-based worker pools.
//!
//! Two pools share one mechanism (spawn, reap, heartbeat) and differ only in
//! how tasks are handed to workers.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────┐
//!                     │ Parent Process  │
//!                     │ (control loop)  │
//!                     └────────┬────────┘
//!                    fork      │      waitpid (own pids only)
//!               ┌──────────────┼──────────────┐
//!               │              │              │
//!         ┌─────▼─────┐  ┌─────▼─────┐  ┌─────▼─────┐
//!         │ Worker 1  │  │ Worker 2  │  │ Worker N  │
//!         │ jitter    │  │ jitter    │  │ jitter    │
//!         │ task()    │  │ task(p2)  │  │ task(pN)  │
//!         │ exit 0/1  │  │ exit 0/1  │  │ exit 0/1  │
//!         └───────────┘  └───────────┘  └───────────┘
//! ```
//!
//! - [`FixedTaskPool`] forks `cap` workers running the same task.
//! - [`ParameterizedTaskPool`] forks one worker per parameter record, at most
//!   `cap` at a time, refilling as workers exit.
//!
//! Workers never report back except through their exit status.

mod counters;
mod fixed;
mod parameterized;
mod reap;
mod signals;
mod spawn;

pub use counters::PoolCounters;
pub use fixed::FixedTaskPool;
pub use parameterized::ParameterizedTaskPool;
pub use signals::{TASK_FAILED_EXIT_CODE, TerminationReason, WorkerExit, analyze_wait_status};
pub use spawn::{Forker, SystemForker};

use crate::config::CapacityPolicy;
use crate::error::{PoolError, Result};
use reap::WorkerSlot;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// What a finished run looked like from the parent's side.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Tasks the pool set out to run (after any fork-failure shrinkage in
    /// the fixed pool).
    pub total: usize,
    /// Workers reaped.
    pub finished: usize,
    /// Workers that exited 0.
    pub succeeded: usize,
    /// Workers that exited non-zero, were signaled, or were lost.
    pub failed: usize,
    /// Process cap passed at construction.
    pub requested_cap: usize,
    /// Cap left after fork failures.
    pub effective_cap: usize,
    /// Most workers alive at once.
    pub peak_active: usize,
    /// Progress lines emitted while waiting.
    pub heartbeats: usize,
    /// Parameter record indices in the order they were handed to workers.
    pub dispatch_order: Vec<usize>,
    /// Parameter record indices whose worker did not exit 0.
    pub failed_records: Vec<usize>,
    pub elapsed: Duration,
}

impl RunSummary {
    fn new(requested_cap: usize) -> Self {
        Self {
            requested_cap,
            effective_cap: requested_cap,
            ..Self::default()
        }
    }

    fn record_exit(&mut self, slot: &WorkerSlot, exit: &WorkerExit) {
        if exit.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            if let Some(record) = slot.record {
                self.failed_records.push(record);
            }
        }
    }

    fn finalize(mut self, counters: &PoolCounters, heartbeats: usize, started: Instant) -> Self {
        self.total = counters.total();
        self.finished = counters.finished();
        self.peak_active = counters.peak_active();
        self.heartbeats = heartbeats;
        self.elapsed = started.elapsed();
        self
    }

    /// True when every worker exited 0.
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.finished == self.total
    }
}

/// Validate a requested process cap.
pub(crate) fn validate_process_count(cap: i64) -> Result<usize> {
    if cap <= 0 {
        return Err(PoolError::InvalidProcessCount(cap.to_string()));
    }
    usize::try_from(cap).map_err(|_| PoolError::InvalidProcessCount(cap.to_string()))
}

/// Parse a process cap from user input, e.g. a CLI flag.
///
/// Non-numeric and non-positive values are rejected with
/// [`PoolError::InvalidProcessCount`].
pub fn parse_process_count(input: &str) -> Result<i64> {
    let cap = input
        .trim()
        .parse::<i64>()
        .map_err(|_| PoolError::InvalidProcessCount(format!("'{}'", input)))?;
    validate_process_count(cap)?;
    Ok(cap)
}

fn log_worker_exit(slot: &WorkerSlot, exit: &WorkerExit, counters: &PoolCounters) {
    let runtime_ms = slot.spawned_at.elapsed().as_millis() as u64;
    if exit.is_success() {
        info!(
            pid = exit.pid.as_raw(),
            record = slot.record,
            runtime_ms,
            active = counters.active(),
            finished = counters.finished(),
            "Worker exited"
        );
    } else {
        warn!(
            pid = exit.pid.as_raw(),
            record = slot.record,
            runtime_ms,
            reason = %exit.reason,
            active = counters.active(),
            finished = counters.finished(),
            "Worker failed"
        );
    }
}

/// Apply the capacity policy once no worker can be forked any more.
///
/// Under [`CapacityPolicy::Terminate`] this exits the process with status 1
/// and does not return.
fn capacity_exhausted(policy: CapacityPolicy, pending: usize) -> PoolError {
    error!(pending, "Worker capacity dropped to zero, giving up");
    match policy {
        CapacityPolicy::Terminate => std::process::exit(1),
        CapacityPolicy::ReturnError => PoolError::CapacityExhausted { pending },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_validate_process_count() {
        assert_eq!(validate_process_count(3).unwrap(), 3);
        assert!(matches!(
            validate_process_count(0),
            Err(PoolError::InvalidProcessCount(v)) if v == "0"
        ));
        assert!(matches!(
            validate_process_count(-3),
            Err(PoolError::InvalidProcessCount(v)) if v == "-3"
        ));
    }

    #[test]
    fn test_parse_process_count() {
        assert_eq!(parse_process_count(" 4 ").unwrap(), 4);
        assert!(matches!(
            parse_process_count("four"),
            Err(PoolError::InvalidProcessCount(v)) if v.contains("four")
        ));
        assert!(parse_process_count("-1").is_err());
        assert!(parse_process_count("2.5").is_err());
    }

    #[test]
    fn test_summary_records_failures_by_record() {
        let mut summary = RunSummary::new(2);
        let ok = WorkerSlot::new(Pid::from_raw(10), Some(0));
        let bad = WorkerSlot::new(Pid::from_raw(11), Some(1));
        summary.record_exit(
            &ok,
            &WorkerExit {
                pid: ok.pid,
                reason: TerminationReason::Exited(0),
            },
        );
        summary.record_exit(
            &bad,
            &WorkerExit {
                pid: bad.pid,
                reason: TerminationReason::Exited(TASK_FAILED_EXIT_CODE),
            },
        );
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failed_records, vec![1]);
    }

    #[test]
    fn test_capacity_exhausted_returns_error() {
        let err = capacity_exhausted(CapacityPolicy::ReturnError, 3);
        assert!(matches!(err, PoolError::CapacityExhausted { pending: 3 }));
    }
}
