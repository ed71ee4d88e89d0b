use crate::config::TimingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    Abandon,
}

/// Validity window for a command, measured from its first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    pub window_ms: u64,
}

impl ExpiryPolicy {
    pub fn new(window_ms: u64) -> Self {
        Self { window_ms }
    }

    pub fn after_failure(&self, first_attempted_at_ms: u64, now_ms: u64) -> RetryDecision {
        if now_ms < first_attempted_at_ms.saturating_add(self.window_ms) {
            RetryDecision::Retry
        } else {
            RetryDecision::Abandon
        }
    }
}

impl From<&TimingConfig> for ExpiryPolicy {
    fn from(timing: &TimingConfig) -> Self {
        Self::new(timing.command_expiry_ms)
    }
}

/// Exponential reconnect delay: `base * 2^(failures - 1)`, with the
/// multiplier capped at `max_multiplier`. No delay before any failure.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_multiplier: u32,
    failures: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_multiplier: u32) -> Self {
        Self {
            base_ms,
            max_multiplier: max_multiplier.max(1),
            failures: 0,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn delay_ms(&self) -> u64 {
        if self.failures == 0 {
            return 0;
        }
        let exponent = (self.failures - 1).min(31);
        let multiplier = (1u32 << exponent).min(self.max_multiplier);
        self.base_ms.saturating_mul(u64::from(multiplier))
    }
}

impl From<&TimingConfig> for Backoff {
    fn from(timing: &TimingConfig) -> Self {
        Self::new(timing.reconnect_base_ms, timing.reconnect_max_multiplier)
    }
}
