//! Timing configuration for an IDE channel

/// Timeouts and poll intervals, all in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdeConfig {
    /// Budget for a data transfer command and for waiting on a stale command
    pub data_xfer_timeout_ms: u64,
    /// Budget for each IDENTIFY issued while probing
    pub probe_timeout_ms: u64,
    /// Sleep between busy polls
    pub busy_poll_interval_ms: u64,
    /// How long SRST stays asserted
    pub reset_hold_ms: u64,
    /// Not-busy polls after a software reset
    pub reset_poll_attempts: u32,
    pub reset_poll_interval_ms: u64,
    /// Settle time after writing the select register
    pub select_settle_ms: u64,
}

impl Default for IdeConfig {
    fn default() -> Self {
        Self {
            data_xfer_timeout_ms: 10_000,
            probe_timeout_ms: 1_000,
            busy_poll_interval_ms: 10,
            reset_hold_ms: 5,
            reset_poll_attempts: 5,
            reset_poll_interval_ms: 10,
            select_settle_ms: 1,
        }
    }
}

impl IdeConfig {
    pub fn with_data_xfer_timeout(mut self, ms: u64) -> Self {
        self.data_xfer_timeout_ms = ms;
        self
    }

    pub fn with_probe_timeout(mut self, ms: u64) -> Self {
        self.probe_timeout_ms = ms;
        self
    }

    pub fn with_busy_poll_interval(mut self, ms: u64) -> Self {
        self.busy_poll_interval_ms = ms.max(1);
        self
    }

    pub fn with_reset_timing(mut self, hold_ms: u64, attempts: u32, interval_ms: u64) -> Self {
        self.reset_hold_ms = hold_ms;
        self.reset_poll_attempts = attempts;
        self.reset_poll_interval_ms = interval_ms;
        self
    }

    pub fn with_select_settle(mut self, ms: u64) -> Self {
        self.select_settle_ms = ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_hardware_timing() {
        let config = IdeConfig::default();
        assert_eq!(config.data_xfer_timeout_ms, 10_000);
        assert_eq!(config.probe_timeout_ms, 1_000);
        assert_eq!(config.reset_poll_attempts, 5);
    }

    #[test]
    fn poll_interval_never_drops_to_zero() {
        let config = IdeConfig::default().with_busy_poll_interval(0);
        assert_eq!(config.busy_poll_interval_ms, 1);
    }
}
