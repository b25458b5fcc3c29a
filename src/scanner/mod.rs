//! Concurrent discovery engine
//!
//! The coordinator fills a task queue with target addresses, a fixed pool
//! of worker threads polls them, and the run summary counts what was found.

pub mod coordinator;
pub mod queue;
pub mod worker;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub use coordinator::{ScanCoordinator, TransportFactory};
pub use queue::{TaskGuard, TaskQueue, TaskReceiver};
pub use worker::{DeviceOutcome, Worker};

/// Lifecycle of one coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Filling,
    Draining,
    ShuttingDown,
    Joined,
    Closed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Filling => "filling",
            RunState::Draining => "draining",
            RunState::ShuttingDown => "shutting down",
            RunState::Joined => "joined",
            RunState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Counters shared by the workers of one run
#[derive(Debug, Default)]
pub struct RunSummary {
    new_hosts: AtomicUsize,
    responding_hosts: AtomicUsize,
}

impl RunSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_responding(&self) {
        self.responding_hosts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_new(&self) {
        self.new_hosts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn new_hosts(&self) -> usize {
        self.new_hosts.load(Ordering::Relaxed)
    }

    pub fn responding_hosts(&self) -> usize {
        self.responding_hosts.load(Ordering::Relaxed)
    }
}

/// Snapshot of a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub new_hosts: usize,
    pub responding_hosts: usize,
    pub targets: usize,
    pub workers: usize,
    pub duration: Duration,
}

impl RunReport {
    pub fn from_summary(summary: &RunSummary, targets: usize, workers: usize, duration: Duration) -> Self {
        Self {
            new_hosts: summary.new_hosts(),
            responding_hosts: summary.responding_hosts(),
            targets,
            workers,
            duration,
        }
    }

    /// Fold in the report of another group of the same run
    pub fn absorb(&mut self, other: &RunReport) {
        self.new_hosts += other.new_hosts;
        self.responding_hosts += other.responding_hosts;
        self.targets += other.targets;
        self.workers = self.workers.max(other.workers);
        self.duration += other.duration;
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} targets, {} responding, {} new in {:.2}s",
            self.targets,
            self.responding_hosts,
            self.new_hosts,
            self.duration.as_secs_f64()
        )
    }
}

/// Converts a location between scripts; the conversion itself lives outside
/// this crate
pub trait Transliterator: Send + Sync {
    fn transliterate(&self, text: &str, schema: &str) -> Option<String>;
}
