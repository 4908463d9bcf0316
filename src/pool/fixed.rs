//! Pool that runs one task `cap` times in parallel.

use super::counters::PoolCounters;
use super::reap::{Heartbeat, Reaper, WorkerSlot};
use super::signals::TASK_FAILED_EXIT_CODE;
use super::spawn::{Forker, JitterSource, SystemForker, report_failure, run_task, spawn_worker};
use super::{RunSummary, capacity_exhausted, log_worker_exit, validate_process_count};
use crate::config::PoolConfig;
use crate::error::{PoolError, Result};
use nix::unistd::getpid;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

type Task = Box<dyn Fn() -> anyhow::Result<()>>;

/// Forks `cap` workers that all run the same task once, then waits for
/// every one of them.
///
/// ```no_run
/// use forkpool::FixedTaskPool;
///
/// let pool = FixedTaskPool::new(3, || {
///     std::thread::sleep(std::time::Duration::from_secs(3));
///     println!("worker {} done", std::process::id());
///     Ok(())
/// })?;
/// let summary = pool.run_then(|| println!("all workers finished"))?;
/// assert_eq!(summary.finished, 3);
/// # Ok::<(), forkpool::PoolError>(())
/// ```
pub struct FixedTaskPool {
    cap: usize,
    task: Task,
    config: PoolConfig,
    forker: Box<dyn Forker>,
}

impl FixedTaskPool {
    /// Create a pool of `cap` workers. Fails with
    /// [`PoolError::InvalidProcessCount`] unless `cap > 0`.
    pub fn new<F>(cap: i64, task: F) -> Result<Self>
    where
        F: Fn() -> anyhow::Result<()> + 'static,
    {
        let cap = validate_process_count(cap)?;
        Ok(Self {
            cap,
            task: Box::new(task),
            config: PoolConfig::for_fixed(),
            forker: Box::new(SystemForker),
        })
    }

    pub fn with_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the process source. Mostly useful for simulating fork failures.
    pub fn with_forker(mut self, forker: impl Forker + 'static) -> Self {
        self.forker = Box::new(forker);
        self
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Run all workers and wait for them.
    ///
    /// With `cap == 1` the task runs in the calling process and the process
    /// then exits; this call does not return. The exit status follows the
    /// task: 0 on success, [`TASK_FAILED_EXIT_CODE`] if it errored or panicked.
    pub fn run(self) -> Result<RunSummary> {
        self.run_inner(None::<fn()>)
    }

    /// Like [`run`](Self::run), invoking `on_complete` once in the parent
    /// after every worker has been reaped.
    pub fn run_then<C: FnOnce()>(self, on_complete: C) -> Result<RunSummary> {
        self.run_inner(Some(on_complete))
    }

    #[instrument(level = "debug", skip_all, fields(workers = self.cap))]
    fn run_inner<C: FnOnce()>(mut self, on_complete: Option<C>) -> Result<RunSummary> {
        let started = Instant::now();
        info!(
            pid = getpid().as_raw(),
            workers = self.cap,
            heartbeat = self.config.heartbeat,
            "Starting fixed task pool"
        );

        if self.cap == 1 {
            self.run_in_process(on_complete);
        }

        let mut counters = PoolCounters::new(self.cap);
        let mut summary = RunSummary::new(self.cap);
        let mut jitter = JitterSource::new(self.config.jitter, self.config.seed);
        let mut reaper = Reaper::new();

        for attempt in 0..self.cap {
            let delay = jitter.draw();
            counters.dispatch();
            let task = &self.task;
            match spawn_worker(&mut *self.forker, delay, || task()) {
                Ok(pid) => {
                    debug!(pid = pid.as_raw(), attempt, "Forked worker");
                    reaper.track(WorkerSlot::new(pid, None));
                }
                Err(e) => {
                    counters.undo_dispatch();
                    counters.abandon();
                    summary.effective_cap -= 1;
                    warn!(
                        attempt,
                        error = %e,
                        workers = counters.total(),
                        "Fork failed, continuing with fewer workers"
                    );
                    std::thread::sleep(self.config.fork_backoff);
                }
            }
        }

        debug!(outstanding = reaper.outstanding(), "Fork loop complete");
        if counters.total() == 0 {
            return Err(capacity_exhausted(self.config.capacity_policy, self.cap));
        }

        let mut heartbeat = Heartbeat::new(self.config.heartbeat_every);
        while !counters.is_done() {
            let reaped = if self.config.heartbeat {
                reaper.wait_polling(self.config.poll_interval, &mut heartbeat, &counters)
            } else {
                reaper.reap_blocking()
            };
            let Some((slot, exit)) = reaped else {
                break;
            };
            counters.finish();
            summary.record_exit(&slot, &exit);
            log_worker_exit(&slot, &exit, &counters);
        }

        info!(
            finished = counters.finished(),
            failed = summary.failed,
            "All workers finished"
        );

        if let Some(on_complete) = on_complete {
            debug!("Running completion callback");
            on_complete();
        }

        Ok(summary.finalize(&counters, heartbeat.emitted(), started))
    }

    /// Single-worker case: no fork. Run the task here, fire the callback,
    /// exit with the worker exit code.
    fn run_in_process<C: FnOnce()>(&self, on_complete: Option<C>) -> ! {
        info!("Single worker requested, running task in-process");
        let code = match run_task(|| (self.task)()) {
            Ok(()) => 0,
            Err(source) => {
                report_failure(&PoolError::WorkerTaskFailure {
                    pid: getpid().as_raw(),
                    source: source.into(),
                });
                TASK_FAILED_EXIT_CODE
            }
        };

        if let Some(on_complete) = on_complete {
            debug!("Running completion callback");
            on_complete();
        }

        std::process::exit(code)
    }
}

impl std::fmt::Debug for FixedTaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedTaskPool")
            .field("cap", &self.cap)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive_cap() {
        for cap in [0, -3] {
            let err = FixedTaskPool::new(cap, || Ok(())).unwrap_err();
            assert!(matches!(err, PoolError::InvalidProcessCount(_)), "cap {cap}");
        }
    }

    #[test]
    fn test_defaults_to_fixed_preset() {
        let pool = FixedTaskPool::new(4, || Ok(())).unwrap();
        assert_eq!(pool.cap(), 4);
        assert!(pool.config().heartbeat);
        assert_eq!(pool.config().heartbeat_every, 100);
    }

    #[test]
    fn test_debug_hides_task() {
        let pool = FixedTaskPool::new(2, || Ok(())).unwrap();
        let debug = format!("{:?}", pool);
        assert!(debug.contains("FixedTaskPool"));
        assert!(debug.contains("cap: 2"));
    }
}
