//! Reaping finished workers.
//!
//! The reaper only ever waits on pids it was told about. It never calls
//! `waitpid(-1)`, so a pool embedded in a larger program leaves that
//! program's other children alone.

use super::counters::PoolCounters;
use super::signals::{TerminationReason, WorkerExit, analyze_wait_status};
use nix::errno::Errno;
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One in-flight worker.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerSlot {
    pub pid: Pid,
    /// Index of the parameter record this worker runs, if any.
    pub record: Option<usize>,
    pub spawned_at: Instant,
}

impl WorkerSlot {
    pub(crate) fn new(pid: Pid, record: Option<usize>) -> Self {
        Self {
            pid,
            record,
            spawned_at: Instant::now(),
        }
    }
}

/// Counts empty polls and decides when a progress line is due.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    enabled: bool,
    every: u32,
    empty_polls: u32,
    emitted: usize,
}

impl Heartbeat {
    pub(crate) fn new(every: u32) -> Self {
        Self {
            enabled: true,
            every: every.max(1),
            empty_polls: 0,
            emitted: 0,
        }
    }

    /// A heartbeat that never asks for a progress line.
    pub(crate) fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(1)
        }
    }

    /// Register one empty poll. Returns true when a progress line is due.
    pub(crate) fn tick(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.empty_polls += 1;
        if self.empty_polls >= self.every {
            self.empty_polls = 0;
            self.emitted += 1;
            true
        } else {
            false
        }
    }

    pub(crate) fn emitted(&self) -> usize {
        self.emitted
    }
}

/// Tracks outstanding workers in spawn order and collects their exits.
#[derive(Debug, Default)]
pub(crate) struct Reaper {
    slots: Vec<WorkerSlot>,
}

impl Reaper {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn track(&mut self, slot: WorkerSlot) {
        self.slots.push(slot);
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.slots.len()
    }

    /// Collect one exited worker without blocking.
    pub(crate) fn try_reap(&mut self) -> Option<(WorkerSlot, WorkerExit)> {
        for i in 0..self.slots.len() {
            let pid = self.slots[i].pid;
            let reason = loop {
                if let Some(reason) = wait_outcome(pid, waitpid(pid, Some(WaitPidFlag::WNOHANG))) {
                    break reason;
                }
            };
            if reason.is_terminal() {
                let slot = self.slots.remove(i);
                return Some((slot, WorkerExit { pid, reason }));
            }
        }
        None
    }

    /// Block until the oldest outstanding worker exits.
    ///
    /// Returns `None` when nothing is outstanding.
    pub(crate) fn reap_blocking(&mut self) -> Option<(WorkerSlot, WorkerExit)> {
        let pid = self.slots.first()?.pid;
        let reason = loop {
            match wait_outcome(pid, waitpid(pid, None)) {
                Some(reason) if reason.is_terminal() => break reason,
                _ => continue,
            }
        };
        let slot = self.slots.remove(0);
        Some((slot, WorkerExit { pid, reason }))
    }

    /// Poll until one worker exits, sleeping `poll_interval` between empty
    /// polls and logging progress whenever `heartbeat` says so.
    ///
    /// Returns `None` when nothing is outstanding.
    pub(crate) fn wait_polling(
        &mut self,
        poll_interval: Duration,
        heartbeat: &mut Heartbeat,
        counters: &PoolCounters,
    ) -> Option<(WorkerSlot, WorkerExit)> {
        loop {
            if self.slots.is_empty() {
                return None;
            }
            if let Some(exit) = self.try_reap() {
                return Some(exit);
            }
            std::thread::sleep(poll_interval);
            if heartbeat.tick() {
                info!(
                    active = counters.active(),
                    finished = counters.finished(),
                    total = counters.total(),
                    "Waiting for workers to exit"
                );
            }
        }
    }
}

/// Interpret one `waitpid` result for a tracked pid. `None` means the call
/// was interrupted by a signal and must be retried.
fn wait_outcome(pid: Pid, result: nix::Result<WaitStatus>) -> Option<TerminationReason> {
    match result {
        Ok(status) => Some(analyze_wait_status(status)),
        Err(Errno::EINTR) => None,
        Err(e) => Some(lost_worker(pid, e)),
    }
}

/// A tracked pid that `waitpid` refuses (typically ECHILD because someone
/// else reaped it). Count it as finished so the pool cannot wait forever.
fn lost_worker(pid: Pid, err: Errno) -> TerminationReason {
    debug!(pid = pid.as_raw(), error = %err, "waitpid failed for worker");
    TerminationReason::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn spawn_exit(code: i32) -> Pid {
        let child = Command::new("sh")
            .arg("-c")
            .arg(format!("exit {}", code))
            .spawn()
            .expect("Failed to spawn sh");
        Pid::from_raw(child.id() as i32)
    }

    #[test]
    fn test_heartbeat_tick() {
        let mut hb = Heartbeat::new(3);
        assert!(!hb.tick());
        assert!(!hb.tick());
        assert!(hb.tick());
        assert!(!hb.tick());
        assert_eq!(hb.emitted(), 1);
    }

    #[test]
    fn test_heartbeat_disabled() {
        let mut hb = Heartbeat::disabled();
        for _ in 0..10 {
            assert!(!hb.tick());
        }
        assert_eq!(hb.emitted(), 0);
    }

    #[test]
    fn test_heartbeat_zero_means_every_poll() {
        let mut hb = Heartbeat::new(0);
        assert!(hb.tick());
        assert!(hb.tick());
        assert_eq!(hb.emitted(), 2);
    }

    #[test]
    fn test_reap_blocking_in_spawn_order() {
        let mut reaper = Reaper::new();
        let first = spawn_exit(0);
        let second = spawn_exit(3);
        reaper.track(WorkerSlot::new(first, Some(0)));
        reaper.track(WorkerSlot::new(second, Some(1)));

        let (slot, exit) = reaper.reap_blocking().unwrap();
        assert_eq!(slot.record, Some(0));
        assert!(exit.is_success());

        let (slot, exit) = reaper.reap_blocking().unwrap();
        assert_eq!(slot.pid, second);
        assert_eq!(exit.reason, TerminationReason::Exited(3));

        assert!(reaper.reap_blocking().is_none());
        assert_eq!(reaper.outstanding(), 0);
    }

    #[test]
    fn test_wait_polling_collects_exit() {
        let mut reaper = Reaper::new();
        reaper.track(WorkerSlot::new(spawn_exit(0), None));
        let counters = PoolCounters::new(1);
        let mut hb = Heartbeat::new(1000);

        let (_, exit) = reaper
            .wait_polling(Duration::from_millis(5), &mut hb, &counters)
            .unwrap();
        assert!(exit.is_success());
        assert!(reaper.wait_polling(Duration::from_millis(5), &mut hb, &counters).is_none());
    }

    #[test]
    fn test_wait_outcome_retries_interrupted_calls() {
        let pid = Pid::from_raw(42);
        assert_eq!(wait_outcome(pid, Err(Errno::EINTR)), None);
        assert_eq!(
            wait_outcome(pid, Err(Errno::ECHILD)),
            Some(TerminationReason::Unknown)
        );
        assert_eq!(
            wait_outcome(pid, Ok(WaitStatus::Exited(pid, 0))),
            Some(TerminationReason::Exited(0))
        );
        assert_eq!(
            wait_outcome(pid, Ok(WaitStatus::StillAlive)),
            Some(TerminationReason::StillAlive)
        );
    }

    #[test]
    fn test_untracked_pid_counts_as_lost() {
        let mut reaper = Reaper::new();
        // Not our child: waitpid fails with ECHILD
        reaper.track(WorkerSlot::new(Pid::from_raw(1), None));
        let (_, exit) = reaper.try_reap().unwrap();
        assert_eq!(exit.reason, TerminationReason::Unknown);
    }
}
