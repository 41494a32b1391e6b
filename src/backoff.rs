//! Backoff between lease claim attempts.
//!
//! Delays grow exponentially from `base` and are capped at `max`. Attempt `0`
//! is the first claim and never waits. [`AcquireBackoff::jittered`] spreads
//! contending callers with equal jitter (uniform in `[delay/2, delay]`) so
//! waiters on a hot key do not retry in lockstep.

use rand::Rng;
use std::time::Duration;

use crate::error::LimiterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireBackoff {
    base: Duration,
    max: Duration,
}

impl Default for AcquireBackoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(10),
            max: Duration::from_millis(200),
        }
    }
}

impl AcquireBackoff {
    pub fn new(base: Duration, max: Duration) -> Result<Self, LimiterError> {
        if base.is_zero() {
            return Err(LimiterError::Configuration(
                "backoff base must be greater than zero".to_string(),
            ));
        }
        if max < base {
            return Err(LimiterError::Configuration(format!(
                "backoff max ({:?}) must be >= base ({:?})",
                max, base
            )));
        }
        Ok(Self { base, max })
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Un-jittered delay before attempt `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn jittered(&self, attempt: u32) -> Duration {
        self.jittered_with_rng(attempt, &mut rand::thread_rng())
    }

    pub fn jittered_with_rng<R: Rng>(&self, attempt: u32, rng: &mut R) -> Duration {
        let millis = self.delay(attempt).as_millis().try_into().unwrap_or(u64::MAX);
        if millis == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rng.gen_range(millis / 2..=millis))
    }
}
