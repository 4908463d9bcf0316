//! Pool progress counters.
//!
//! Only the parent's control loop ever touches these. Workers get a
//! copy-on-write snapshot at fork time and never write back, so there is
//! a single writer and no synchronization.

/// Progress counters for one pool run.
///
/// Invariants, checked after every mutation in debug builds:
/// `finished <= dispatched <= total` and `active == dispatched - finished`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounters {
    active: usize,
    dispatched: usize,
    finished: usize,
    total: usize,
    peak_active: usize,
}

impl PoolCounters {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Workers currently running.
    pub fn active(&self) -> usize {
        self.active
    }

    /// Tasks handed to a worker so far.
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Workers reaped so far.
    pub fn finished(&self) -> usize {
        self.finished
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Highest `active` value observed during the run.
    pub fn peak_active(&self) -> usize {
        self.peak_active
    }

    /// Tasks not yet handed to a worker.
    pub fn undispatched(&self) -> usize {
        self.total - self.dispatched
    }

    pub fn is_done(&self) -> bool {
        self.finished == self.total
    }

    /// Claim a slot for a task about to be forked.
    pub fn dispatch(&mut self) {
        self.active += 1;
        self.dispatched += 1;
        self.peak_active = self.peak_active.max(self.active);
        self.check_invariants();
    }

    /// Roll back a [`dispatch`](Self::dispatch) whose fork failed.
    pub fn undo_dispatch(&mut self) {
        debug_assert!(self.active > 0 && self.dispatched > self.finished);
        self.active -= 1;
        self.dispatched -= 1;
        self.check_invariants();
    }

    /// Drop one undispatched task from the run entirely.
    pub fn abandon(&mut self) {
        debug_assert!(self.total > self.dispatched);
        self.total -= 1;
        self.check_invariants();
    }

    /// Record a reaped worker.
    pub fn finish(&mut self) {
        debug_assert!(self.active > 0);
        self.active -= 1;
        self.finished += 1;
        self.check_invariants();
    }

    fn check_invariants(&self) {
        debug_assert!(self.finished <= self.dispatched, "{:?}", self);
        debug_assert!(self.dispatched <= self.total, "{:?}", self);
        debug_assert_eq!(self.active, self.dispatched - self.finished, "{:?}", self);
    }
}
