//! Retry policy: backoff between attempts to take a busy mutex.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a ceiling.
///
/// delay = min(base_delay * multiplier^(attempts - 1), max_delay)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    pub multiplier: f64,

    pub max_delay: Duration,

    /// Fraction of the delay added at random (0.0 disables jitter).
    pub jitter: f64,
}

impl RetryPolicy {
    /// Policy used while waiting for a work item mutex: starts at 50ms and
    /// settles at 2s so a long-held lock is polled without hammering the
    /// store.
    pub fn mutex_acquisition() -> Self {
        Self {
            base_delay: Duration::from_millis(50),
            multiplier: 2.0,
            max_delay: Duration::from_secs(2),
            jitter: 0.2,
        }
    }

    /// Delay before retry number `attempts` (1-indexed), without jitter.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();

        if !delay_secs.is_finite() || delay_secs >= max_secs {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs.max(0.0))
        }
    }

    /// `next_delay` plus up to `jitter * delay` of random spread, so
    /// replicas waiting on the same key don't retry in lockstep.
    pub fn next_delay_with_jitter(&self, attempts: u32) -> Duration {
        let delay = self.next_delay(attempts);
        if self.jitter <= 0.0 {
            return delay;
        }
        let spread = rand::thread_rng().gen_range(0.0..=self.jitter);
        delay.mul_f64(1.0 + spread)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::mutex_acquisition()
    }
}
