//! Reconnect backoff policy.
//!
//! `delay(attempt) = min(max, initial * multiplier^attempt)` with
//! multiplicative jitter of ±`jitter_factor`.  Successive attempts in one
//! disconnection episode produce non-decreasing delays (up to the jitter
//! bound) until a successful connect resets the attempt counter.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(5 * 60),
            multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        BackoffPolicy {
            initial,
            max,
            ..Default::default()
        }
    }

    /// Delay before dial attempt `attempt` (0-based), jittered.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt).as_secs_f64();
        let noise = 1.0 + self.jitter_factor * (rand::random::<f64>() * 2.0 - 1.0);
        Duration::from_secs_f64((base * noise).max(0.0))
    }

    /// Un-jittered delay, exposed for tests and logging.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(64) as i32);
        let secs = (self.initial.as_secs_f64() * exp).min(self.max.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
