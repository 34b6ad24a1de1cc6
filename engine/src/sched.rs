// sched.rs — Host scheduler interface and a fixed-step driver
//
// The engine never owns a clock. Suspensions are announced to the host
// through `HostScheduler`, and the host decides when to tick. The
// `FixedStepScheduler` is the reference host: a clock advanced by a constant
// `dt` before every tick, plus bookkeeping of the suspensions the running
// execution has open.
//
// Preconditions: `dt` is finite and non-negative.
// Postconditions: every handle is started at most once and ends either
//   cancelled or resumed.
// Failure modes: none.
// Side effects: `tick` drives the execution it is handed.

use std::collections::BTreeSet;

use tracing::debug;

use crate::exec::Execution;
use crate::id::SuspensionHandle;

pub trait HostScheduler {
    /// Current host time in seconds.
    fn now(&self) -> f64;
    fn start_suspension(&mut self, handle: SuspensionHandle);
    fn cancel_suspension(&mut self, handle: SuspensionHandle);
    /// The suspension completed and its fiber continued.
    fn resume_suspension(&mut self, _handle: SuspensionHandle) {}
}

/// Counters kept by the fixed-step host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub started: u64,
    pub cancelled: u64,
    pub resumed: u64,
    pub ticks: u64,
}

#[derive(Debug, Clone)]
pub struct FixedStepScheduler {
    now: f64,
    dt: f64,
    open: BTreeSet<SuspensionHandle>,
    stats: SchedulerStats,
}

impl Default for FixedStepScheduler {
    fn default() -> Self {
        Self::new(1.0 / 60.0)
    }
}

impl FixedStepScheduler {
    pub fn new(dt: f64) -> Self {
        Self {
            now: 0.0,
            dt,
            open: BTreeSet::new(),
            stats: SchedulerStats::default(),
        }
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Suspensions started and neither cancelled nor resumed.
    pub fn open(&self) -> usize {
        self.open.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Advance the clock by `dt`, then tick `exec`.
    pub fn tick(&mut self, exec: &mut dyn Execution) {
        self.now += self.dt;
        self.stats.ticks += 1;
        exec.tick(self);
    }

    /// Tick up to `ticks` times, stopping early once `exec` is idle.
    /// Returns the number of ticks run.
    pub fn run(&mut self, exec: &mut dyn Execution, ticks: u32) -> u32 {
        for done in 0..ticks {
            if exec.is_idle() {
                return done;
            }
            self.tick(exec);
        }
        ticks
    }
}

impl HostScheduler for FixedStepScheduler {
    fn now(&self) -> f64 {
        self.now
    }

    fn start_suspension(&mut self, handle: SuspensionHandle) {
        debug!(handle = handle.0, now = self.now, "suspension started");
        self.stats.started += 1;
        self.open.insert(handle);
    }

    fn cancel_suspension(&mut self, handle: SuspensionHandle) {
        if self.open.remove(&handle) {
            debug!(handle = handle.0, "suspension cancelled");
            self.stats.cancelled += 1;
        }
    }

    fn resume_suspension(&mut self, handle: SuspensionHandle) {
        if self.open.remove(&handle) {
            self.stats.resumed += 1;
        }
    }
}
