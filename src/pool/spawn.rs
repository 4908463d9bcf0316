//! Worker spawning.
//!
//! Workers are plain `fork()` children: they inherit the parent's memory
//! (including the task closure and any handles opened before the fork), run
//! exactly one task invocation and exit. Nothing is exec'd.

use super::signals::TASK_FAILED_EXIT_CODE;
use crate::config::Jitter;
use crate::error::PoolError;
use nix::unistd::{ForkResult, Pid, getpid};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

/// Source of new processes.
///
/// The pools only ever call [`fork`](Forker::fork) from their single-threaded
/// control loop. Tests swap in forkers that fail on chosen attempts.
pub trait Forker {
    fn fork(&mut self) -> nix::Result<ForkResult>;
}

/// Forks the current process with `fork(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemForker;

impl Forker for SystemForker {
    fn fork(&mut self) -> nix::Result<ForkResult> {
        // SAFETY: the child only sleeps, runs the task and exits; it never
        // returns into the parent's control loop.
        unsafe { nix::unistd::fork() }
    }
}

/// Draws per-worker start delays from a uniform range.
pub(crate) struct JitterSource {
    range: Jitter,
    rng: StdRng,
}

impl JitterSource {
    pub(crate) fn new(range: Jitter, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { range, rng }
    }

    pub(crate) fn draw(&mut self) -> Duration {
        if self.range.min == self.range.max {
            return self.range.min;
        }
        let lo = self.range.min.as_micros() as u64;
        let hi = self.range.max.as_micros() as u64;
        Duration::from_micros(self.rng.gen_range(lo..=hi))
    }
}

/// Fork one worker bound to `task`.
///
/// Returns the child's pid in the parent. In the child this never returns:
/// the task runs after `delay` and the process exits with 0 on success or
/// [`TASK_FAILED_EXIT_CODE`] if the task errored or panicked.
pub(crate) fn spawn_worker<F>(forker: &mut dyn Forker, delay: Duration, task: F) -> nix::Result<Pid>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match forker.fork()? {
        ForkResult::Parent { child } => Ok(child),
        ForkResult::Child => run_in_child(delay, task),
    }
}

fn run_in_child<F>(delay: Duration, task: F) -> !
where
    F: FnOnce() -> anyhow::Result<()>,
{
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }

    let pid = getpid();
    tracing::debug!(pid = pid.as_raw(), delay_ms = delay.as_millis() as u64, "Worker started");

    let code = match run_task(task) {
        Ok(()) => 0,
        Err(source) => {
            let failure = PoolError::WorkerTaskFailure {
                pid: pid.as_raw(),
                source: source.into(),
            };
            report_failure(&failure);
            TASK_FAILED_EXIT_CODE
        }
    };

    std::process::exit(code)
}

/// Run a task, turning a panic into an ordinary error.
pub(crate) fn run_task<F>(task: F) -> anyhow::Result<()>
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(result) => result,
        Err(payload) => Err(anyhow::anyhow!("task panicked: {}", panic_message(&*payload))),
    }
}

pub(crate) fn report_failure(failure: &PoolError) {
    use std::error::Error as _;
    let cause = failure
        .source()
        .map(|e| e.to_string())
        .unwrap_or_default();
    tracing::error!(error = %failure, cause = %cause, "Task failed");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
