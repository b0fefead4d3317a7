//! # Fibonacci Backoff
//!
//! Progressive backoff used between conflicting restart writes.
//! The sequence follows base × (1, 1, 2, 3, 5, 8, ...) capped at a maximum.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    base: Duration,
    max: Duration,
    previous: u32,
    current: u32,
}

impl FibonacciBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            previous: 0,
            current: 1,
        }
    }

    /// Next delay in the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.base.saturating_mul(self.current).min(self.max);
        let next = self.previous.saturating_add(self.current);
        self.previous = self.current;
        self.current = next;
        delay
    }
}
