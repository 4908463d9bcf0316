//! Pool that runs a task once per parameter record.

use super::counters::PoolCounters;
use super::reap::{Heartbeat, Reaper, WorkerSlot};
use super::spawn::{Forker, JitterSource, SystemForker, spawn_worker};
use super::{RunSummary, capacity_exhausted, log_worker_exit, validate_process_count};
use crate::config::PoolConfig;
use crate::error::Result;
use crate::params::{ParamQueue, ParamRecord};
use nix::unistd::getpid;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

type Task = Box<dyn Fn(&ParamRecord) -> anyhow::Result<()>>;

/// Runs `task(record)` in its own worker for every record of a parameter
/// queue, keeping at most `cap` workers alive.
///
/// Records are dispatched strictly in queue order and each exactly once. A
/// record whose fork fails goes back to the head of the queue and the cap
/// shrinks by one for the rest of the run.
///
/// ```no_run
/// use forkpool::{ParamRecord, ParameterizedTaskPool};
/// use serde_json::json;
///
/// let params = json!([
///     { "begin": "2018-01-01", "end": "2018-01-02" },
///     { "begin": "2018-01-02", "end": "2018-01-03" },
/// ]);
/// let pool = ParameterizedTaskPool::from_json(3, |p: &ParamRecord| {
///     println!("{} ~ {}", p["begin"], p["end"]);
///     Ok(())
/// }, params)?;
/// pool.run_then(|| println!("done"))?;
/// # Ok::<(), forkpool::PoolError>(())
/// ```
pub struct ParameterizedTaskPool {
    cap: usize,
    task: Task,
    queue: ParamQueue,
    config: PoolConfig,
    forker: Box<dyn Forker>,
}

impl ParameterizedTaskPool {
    /// Create a pool over `params`. Fails on a non-positive cap or an empty
    /// parameter list.
    pub fn new<F>(cap: i64, task: F, params: Vec<ParamRecord>) -> Result<Self>
    where
        F: Fn(&ParamRecord) -> anyhow::Result<()> + 'static,
    {
        let cap = validate_process_count(cap)?;
        Ok(Self::with_queue(cap, Box::new(task), ParamQueue::new(params)?))
    }

    /// Create a pool from a JSON array of objects.
    pub fn from_json<F>(cap: i64, task: F, params: Value) -> Result<Self>
    where
        F: Fn(&ParamRecord) -> anyhow::Result<()> + 'static,
    {
        let cap = validate_process_count(cap)?;
        Ok(Self::with_queue(cap, Box::new(task), ParamQueue::from_json(params)?))
    }

    /// Create a pool over an already-built queue.
    pub fn from_queue<F>(cap: i64, task: F, queue: ParamQueue) -> Result<Self>
    where
        F: Fn(&ParamRecord) -> anyhow::Result<()> + 'static,
    {
        let cap = validate_process_count(cap)?;
        Ok(Self::with_queue(cap, Box::new(task), queue))
    }

    fn with_queue(cap: usize, task: Task, queue: ParamQueue) -> Self {
        Self {
            cap,
            task,
            queue,
            config: PoolConfig::for_parameterized(),
            forker: Box::new(SystemForker),
        }
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

    pub fn total_tasks(&self) -> usize {
        self.queue.total()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Dispatch every record and wait for all workers.
    pub fn run(self) -> Result<RunSummary> {
        self.run_inner(None::<fn()>)
    }

    /// Like [`run`](Self::run), invoking `on_complete` once in the parent
    /// after the last worker has been reaped.
    pub fn run_then<C: FnOnce()>(self, on_complete: C) -> Result<RunSummary> {
        self.run_inner(Some(on_complete))
    }

    #[instrument(level = "debug", skip_all, fields(workers = self.cap, tasks = self.queue.total()))]
    fn run_inner<C: FnOnce()>(mut self, on_complete: Option<C>) -> Result<RunSummary> {
        let started = Instant::now();
        info!(
            pid = getpid().as_raw(),
            tasks = self.queue.total(),
            workers = self.cap,
            "Starting parameterized task pool"
        );

        let mut counters = PoolCounters::new(self.queue.total());
        let mut summary = RunSummary::new(self.cap);
        let mut jitter = JitterSource::new(self.config.jitter, self.config.seed);
        let mut reaper = Reaper::new();
        let mut heartbeat = if self.config.heartbeat {
            Heartbeat::new(self.config.heartbeat_every)
        } else {
            Heartbeat::disabled()
        };

        loop {
            if counters.is_done() {
                break;
            }

            // Capacity only shrinks from the dispatch branch, which requires
            // active < cap, so nothing is running once it reaches zero.
            if summary.effective_cap == 0 {
                return Err(capacity_exhausted(
                    self.config.capacity_policy,
                    counters.undispatched(),
                ));
            }

            if counters.active() >= summary.effective_cap || counters.undispatched() == 0 {
                let Some((slot, exit)) =
                    reaper.wait_polling(self.config.poll_interval, &mut heartbeat, &counters)
                else {
                    break;
                };
                counters.finish();
                summary.record_exit(&slot, &exit);
                log_worker_exit(&slot, &exit, &counters);
                continue;
            }

            let Some((index, record)) = self.queue.pop_front() else {
                break;
            };
            counters.dispatch();
            let delay = jitter.draw();
            let task = &self.task;
            match spawn_worker(&mut *self.forker, delay, || task(&record)) {
                Ok(pid) => {
                    debug!(
                        pid = pid.as_raw(),
                        record = index,
                        active = counters.active(),
                        dispatched = counters.dispatched(),
                        "Dispatched parameters to worker"
                    );
                    reaper.track(WorkerSlot::new(pid, Some(index)));
                    summary.dispatch_order.push(index);
                }
                Err(e) => {
                    counters.undo_dispatch();
                    self.queue.push_front(index, record);
                    summary.effective_cap -= 1;
                    warn!(
                        record = index,
                        error = %e,
                        effective_cap = summary.effective_cap,
                        "Fork failed, requeued parameters and lowered the worker cap"
                    );
                    std::thread::sleep(self.config.fork_backoff);
                }
            }
        }

        info!(
            finished = counters.finished(),
            failed = summary.failed,
            "All tasks finished"
        );

        if let Some(on_complete) = on_complete {
            debug!("Running completion callback");
            on_complete();
        }

        Ok(summary.finalize(&counters, heartbeat.emitted(), started))
    }
}

impl std::fmt::Debug for ParameterizedTaskPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterizedTaskPool")
            .field("cap", &self.cap)
            .field("queue", &self.queue)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolError;
    use serde_json::json;

    fn noop(_: &ParamRecord) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_rejects_empty_params() {
        let err = ParameterizedTaskPool::new(3, noop, Vec::new()).unwrap_err();
        assert!(matches!(err, PoolError::EmptyParameterSequence));
    }

    #[test]
    fn test_rejects_bad_cap_before_params() {
        let err = ParameterizedTaskPool::new(0, noop, Vec::new()).unwrap_err();
        assert!(matches!(err, PoolError::InvalidProcessCount(_)));
    }

    #[test]
    fn test_from_json_validates_shape() {
        let err = ParameterizedTaskPool::from_json(2, noop, json!("2018-01-01")).unwrap_err();
        assert!(matches!(err, PoolError::InvalidParameterSequence(_)));

        let pool =
            ParameterizedTaskPool::from_json(2, noop, json!([{"begin": "a"}, {"begin": "b"}]))
                .unwrap();
        assert_eq!(pool.total_tasks(), 2);
        assert_eq!(pool.cap(), 2);
        assert_eq!(pool.config().heartbeat_every, 50);
    }
}
