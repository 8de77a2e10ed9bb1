//! Reconnect backoff shared by both links.
//!
//! A [`BackoffPolicy`] is plain configuration. Each link owns its own
//! [`Backoff`], so the API side and the serial side recover independently.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    /// Failures tolerated (as Degraded) before the link counts as Disconnected.
    pub degraded_threshold: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            multiplier: 2.0,
            degraded_threshold: 3,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based), capped at `max`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exp = self.multiplier.powi(attempt.saturating_sub(1).min(64) as i32);
        let millis = self.initial.as_millis() as f64 * exp;
        let max = self.max.as_millis() as f64;
        if !millis.is_finite() || millis >= max {
            self.max
        } else {
            Duration::from_millis(millis as u64)
        }
    }
}

/// Per-link retry schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Advance the schedule and return how long to wait before the next try.
    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.policy.delay_for(self.attempt)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
