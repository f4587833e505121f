//! Bounded retry policy.

use std::time::Duration;

/// Upper bound for growing backoff delays.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Delay schedule between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failure.
    Fixed(Duration),
    /// `base * n` after the n-th failure.
    Linear(Duration),
    /// `base * 2^(n-1)` after the n-th failure, capped at [`MAX_BACKOFF`].
    Exponential(Duration),
}

impl Backoff {
    /// Delay to wait after `failed_attempt` (1-based) before trying again.
    pub fn delay(&self, failed_attempt: u32) -> Duration {
        let n = failed_attempt.max(1);
        match *self {
            Self::Fixed(base) => base,
            Self::Linear(base) => base.saturating_mul(n).min(MAX_BACKOFF.max(base)),
            Self::Exponential(base) => {
                let factor = 1u32.checked_shl(n - 1).unwrap_or(u32::MAX);
                base.saturating_mul(factor).min(MAX_BACKOFF.max(base))
            }
        }
    }
}

/// How often a failing step is tried and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::Fixed(Duration::from_secs(1)),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// Whether another try is allowed after `attempts` tries of a step.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts.max(1)
    }
}
