//! Millisecond time source for the driver stack
//!
//! Every wait in the driver (busy polling, reset hold times, command
//! timeouts) goes through a [`Clock`] so the platform can supply its own
//! timer and tests can run on the host.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sleep/uptime primitive supplied by the platform
pub trait Clock: Send + Sync {
    /// Block the calling thread for `ms` milliseconds
    fn sleep_ms(&self, ms: u64);

    /// Milliseconds since the clock was created
    fn uptime_ms(&self) -> u64;
}

/// Host clock backed by `std::time`
#[derive(Debug, Clone)]
pub struct SystemClock {
    boot: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            boot: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn sleep_ms(&self, ms: u64) {
        if ms == 0 {
            return;
        }
        std::thread::sleep(Duration::from_millis(ms));
    }

    fn uptime_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }
}

/// Elapsed-time measurement over a [`Clock`]
pub struct Timer {
    clock: Arc<dyn Clock>,
    start_ms: u64,
}

impl Timer {
    /// Create a new timer starting now
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let start_ms = clock.uptime_ms();
        Self { clock, start_ms }
    }

    /// Get elapsed time in milliseconds
    pub fn elapsed_ms(&self) -> u64 {
        self.clock.uptime_ms().saturating_sub(self.start_ms)
    }

    /// Whether `budget_ms` has been used up
    pub fn expired(&self, budget_ms: u64) -> bool {
        self.elapsed_ms() >= budget_ms
    }

    /// Time left of `budget_ms`, zero once expired
    pub fn remaining_ms(&self, budget_ms: u64) -> u64 {
        budget_ms.saturating_sub(self.elapsed_ms())
    }

    /// Reset the timer to current time
    pub fn reset(&mut self) {
        self.start_ms = self.clock.uptime_ms();
    }
}
