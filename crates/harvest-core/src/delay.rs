//! Request pacing: pre-request jitter and retry backoff.
//!
//! Both delays are pure functions of the configuration (and, for jitter, of
//! the random source passed in), so tests can drive them with a seeded RNG.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use harvest_core::delay::DelayPolicy;
//! use rand::SeedableRng;
//!
//! let policy = DelayPolicy::new(Duration::from_secs(2), Duration::from_secs(5));
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let wait = policy.jitter(&mut rng);
//! assert!(wait >= Duration::from_secs(2) && wait <= Duration::from_secs(5));
//! assert_eq!(policy.backoff(3), Duration::from_secs(4));
//! ```

use std::time::Duration;

use rand::Rng;

use crate::error::HarvestError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayPolicy {
    /// Lower bound of the mandatory pre-request delay.
    pub min_delay: Duration,
    /// Upper bound of the mandatory pre-request delay (inclusive).
    pub max_delay: Duration,
    /// Delay before the first retry; doubles on each further retry.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl DelayPolicy {
    /// Jitter in `[min_delay, max_delay]` with the default backoff schedule.
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
            ..Self::default()
        }
    }

    /// No pre-request delay and no backoff. Meant for tests and local mocks.
    pub fn none() -> Self {
        Self {
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_base: Duration::ZERO,
            backoff_cap: Duration::ZERO,
        }
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.min_delay > self.max_delay {
            return Err(HarvestError::ConfigurationInvalid(format!(
                "min delay {:?} is greater than max delay {:?}",
                self.min_delay, self.max_delay
            )));
        }
        if self.backoff_base > self.backoff_cap {
            return Err(HarvestError::ConfigurationInvalid(format!(
                "backoff base {:?} is greater than backoff cap {:?}",
                self.backoff_base, self.backoff_cap
            )));
        }
        Ok(())
    }

    /// Uniformly distributed delay in `[min_delay, max_delay]`, millisecond
    /// resolution.
    pub fn jitter<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let min_ms = self.min_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        if max_ms <= min_ms {
            return self.min_delay;
        }
        Duration::from_millis(rng.random_range(min_ms..=max_ms))
    }

    /// Delay before retry number `attempt` (1-indexed):
    /// `backoff_base * 2^(attempt - 1)`, capped at `backoff_cap`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.backoff_base.saturating_mul(1u32 << exponent);
        delay.min(self.backoff_cap)
    }
}

impl Default for DelayPolicy {
    /// 3–8 s jitter, backoff 1 s doubling up to 60 s.
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(8),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_jitter_is_bounded() {
        let policy = DelayPolicy::new(Duration::from_millis(100), Duration::from_millis(150));
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let d = policy.jitter(&mut rng);
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_jitter_is_deterministic_for_a_seed() {
        let policy = DelayPolicy::default();
        let a: Vec<Duration> = {
            let mut rng = StdRng::seed_from_u64(9);
            (0..5).map(|_| policy.jitter(&mut rng)).collect()
        };
        let b: Vec<Duration> = {
            let mut rng = StdRng::seed_from_u64(9);
            (0..5).map(|_| policy.jitter(&mut rng)).collect()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_fixed_range_returns_min() {
        let policy = DelayPolicy::new(Duration::from_secs(2), Duration::from_secs(2));
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(policy.jitter(&mut rng), Duration::from_secs(2));
        assert_eq!(DelayPolicy::none().jitter(&mut rng), Duration::ZERO);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = DelayPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(7), Duration::from_secs(60));
        assert_eq!(policy.backoff(500), Duration::from_secs(60));
    }

    #[test]
    fn test_inverted_range_is_invalid() {
        let policy = DelayPolicy::new(Duration::from_secs(5), Duration::from_secs(1));
        assert!(matches!(
            policy.validate(),
            Err(HarvestError::ConfigurationInvalid(_))
        ));
        assert!(DelayPolicy::default().validate().is_ok());
    }
}
