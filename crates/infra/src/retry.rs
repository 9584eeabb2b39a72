//! Retry policy for workflows whose commit lost a race.
//!
//! The wait after the n-th failed attempt is `base_delay * 2^(n-1)`, capped at
//! `max_delay`, then shortened by a random share of up to `spread` so writers
//! that collided once do not come back in lockstep.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included (values below 1 behave as 1).
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Share of the backoff (0.0..=1.0) that may be randomly cut.
    pub spread: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(1),
            spread: 0.5,
        }
    }
}

impl RetryPolicy {
    /// Same delay after every attempt, no spread. Used where timing must be exact.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay: delay,
            max_delay: delay,
            spread: 0.0,
        }
    }

    /// Capped doubling without the random part.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let doublings = (attempt - 1).min(31);
        self.base_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay)
    }

    /// Delay to wait after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        let spread = self.spread.clamp(0.0, 1.0);
        if spread == 0.0 || backoff.is_zero() {
            return backoff;
        }
        let keep = rand::thread_rng().gen_range(1.0 - spread..=1.0);
        backoff.mul_f64(keep)
    }

    /// Whether another attempt may follow `attempts_made` failed ones.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts.max(1)
    }
}
