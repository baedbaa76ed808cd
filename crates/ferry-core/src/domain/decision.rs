//! Retry policy: what happens after a failed attempt.
//!
//! The policy is pure. Given the attempt number and the failure kind, it
//! returns the next action. Applying that action (requeue or fail) is the
//! store's job.

use std::time::Duration;

use super::errors::ErrorKind;

/// Delay schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),

    /// delay = base * multiplier^(attempts - 1), capped at `max`.
    Exponential {
        base: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay before the retry that follows attempt number `attempts` (1-indexed).
    ///
    /// Example with base=1s, multiplier=2.0:
    /// - attempt 1 (first failure): 1s
    /// - attempt 2: 2s
    /// - attempt 3: 4s
    pub fn delay(&self, attempts: u32) -> Duration {
        match self {
            Backoff::Fixed(d) => *d,
            Backoff::Exponential {
                base,
                multiplier,
                max,
            } => {
                let exp = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
                let secs = base.as_secs_f64() * multiplier.powi(exp);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    *max
                } else {
                    Duration::from_secs_f64(secs.max(0.0))
                }
            }
        }
    }
}

/// The next action for a job after a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Retry { delay: Duration },
    Fail,
}

/// Attempt budget plus backoff schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    /// 3 attempts, fixed 1s delay.
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
            max_attempts,
            backoff,
        }
    }

    /// Decide after attempt number `attempts` failed with `kind`.
    pub fn decide(&self, attempts: u32, kind: ErrorKind) -> Decision {
        if kind.is_retryable() && attempts < self.max_attempts {
            Decision::Retry {
                delay: self.backoff.delay(attempts),
            }
        } else {
            Decision::Fail
        }
    }

    /// `decide` collapsed to the `retry_after` argument of `JobStore::fail`.
    pub fn retry_after(&self, attempts: u32, kind: ErrorKind) -> Option<Duration> {
        match self.decide(attempts, kind) {
            Decision::Retry { delay } => Some(delay),
            Decision::Fail => None,
        }
    }
}
