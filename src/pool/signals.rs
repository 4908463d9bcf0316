//! Worker exit analysis.
//!
//! A task's error object cannot cross the process boundary, so the parent
//! learns the outcome of each worker from its wait status alone.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;

/// Exit code a worker uses when its task returned an error or panicked.
pub const TASK_FAILED_EXIT_CODE: i32 = 1;

/// Reason why a worker process terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by signal.
    Signaled(Signal),
    /// Process is still running.
    StillAlive,
    /// The status could not be collected (e.g. the child was already reaped elsewhere).
    Unknown,
}

impl TerminationReason {
    /// Check if this is a successful exit.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Whether the worker has left the process table.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::StillAlive)
    }
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exited(0) => write!(f, "exited successfully"),
            Self::Exited(TASK_FAILED_EXIT_CODE) => {
                write!(f, "exited with code {} (task failed)", TASK_FAILED_EXIT_CODE)
            }
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Signaled(sig) => write!(f, "killed by signal {:?}", sig),
            Self::StillAlive => write!(f, "still running"),
            Self::Unknown => write!(f, "unknown reason"),
        }
    }
}

/// Analyze a `WaitStatus` to determine the termination reason.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, signal, _) => TerminationReason::Signaled(signal),
        // Stopped/continued children have not exited; keep waiting on them.
        WaitStatus::StillAlive | WaitStatus::Stopped(..) | WaitStatus::Continued(_) => {
            TerminationReason::StillAlive
        }
        #[allow(unreachable_patterns)]
        _ => TerminationReason::StillAlive,
    }
}

/// Outcome of one reaped worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub pid: Pid,
    pub reason: TerminationReason,
}

impl WorkerExit {
    pub fn is_success(&self) -> bool {
        self.reason.is_success()
    }
}

impl std::fmt::Display for WorkerExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker {} {}", self.pid, self.reason)
    }
}
