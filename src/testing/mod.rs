//! Test tooling: a simulated IDE channel and small polling helpers

pub mod sim;

use std::time::{Duration, Instant};

/// Poll `condition` until it holds or `timeout_ms` passes
pub fn wait_until(timeout_ms: u64, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
}
