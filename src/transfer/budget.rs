//! Error budget (circuit breaker) owned by one dispatcher.

use std::sync::atomic::{AtomicU64, Ordering};

/// Default number of failed transfers tolerated before admission halts
pub const DEFAULT_ERROR_THRESHOLD: u64 = 3;

#[derive(Debug)]
pub struct ErrorBudget {
    failures: AtomicU64,
    /// 0 disables the breaker
    threshold: u64,
}

impl ErrorBudget {
    pub fn new(threshold: u64) -> Self {
        Self {
            failures: AtomicU64::new(0),
            threshold,
        }
    }

    /// Record one failure, returning the new total
    pub fn record_failure(&self) -> u64 {
        self.failures.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// True once failures reached the threshold
    pub fn is_exhausted(&self) -> bool {
        self.threshold > 0 && self.failures() >= self.threshold
    }
}

impl Default for ErrorBudget {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_THRESHOLD)
    }
}
