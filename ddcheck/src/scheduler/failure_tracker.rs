//! Consecutive-failure counting for the bounded supervisor.
//!
//! Failures older than the window are forgotten, so a loop that fails once a
//! day never reaches the limit. The supervisor clears the tracker when an
//! attempt made progress, so only an unbroken run of failures counts.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct FailureTracker {
    failures: Vec<Instant>,
    window: Duration,
    limit: usize,
    total: u64,
}

impl FailureTracker {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            failures: Vec::new(),
            window,
            limit: limit.max(1),
            total: 0,
        }
    }

    /// Record a failure at `now` and return the failures inside the window.
    pub fn record_failure(&mut self, now: Instant) -> usize {
        self.failures
            .retain(|&t| now.saturating_duration_since(t) < self.window);
        self.failures.push(now);
        self.total += 1;
        self.failures.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.failures.len() >= self.limit
    }

    pub fn clear(&mut self) {
        self.failures.clear();
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}
