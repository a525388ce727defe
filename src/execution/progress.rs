//! Shared progress counter for pool workers.

use parking_lot::Mutex;
use std::time::Duration;

/// Count of completed tasks across all workers of one pool run.
#[derive(Debug, Default)]
pub struct ProgressCounter {
    value: Mutex<u64>,
}

impl ProgressCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed task and return the new total.
    pub fn increment(&self) -> u64 {
        let mut value = self.value.lock();
        *value += 1;
        *value
    }

    pub fn value(&self) -> u64 {
        *self.value.lock()
    }
}

/// Gates one worker's progress lines to at most one per interval.
#[derive(Debug, Clone, Copy)]
pub struct ProgressThrottle {
    interval: Duration,
    last_report: Duration,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_report: Duration::ZERO,
        }
    }

    /// True when a line is due at `elapsed` since the worker started. A due
    /// line is recorded as emitted.
    pub fn ready(&mut self, elapsed: Duration) -> bool {
        if elapsed.saturating_sub(self.last_report) < self.interval {
            return false;
        }
        self.last_report = elapsed;
        true
    }
}

/// Estimated total run time, `elapsed * total / processed`.
pub fn estimate_total(elapsed: Duration, processed: u64, total: Option<usize>) -> Option<Duration> {
    let total = total?;
    if processed == 0 {
        return None;
    }
    Some(elapsed.mul_f64(total as f64 / processed as f64))
}
