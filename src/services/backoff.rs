use std::time::Duration;

/// Exponential redelivery delay: `base * 2^(n-1)` for the n-th redelivery, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap: cap.max(base),
        }
    }

    pub fn cap(&self) -> Duration {
        self.cap
    }

    /// Delay before redelivering a job that has failed `attempt` times.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_redelivery_uses_base() {
        let policy = BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
    }

    #[test]
    fn test_delay_is_monotonic_up_to_cap() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(5));
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "attempt {attempt} went backwards");
            assert!(delay <= policy.cap());
            previous = delay;
        }
        assert_eq!(policy.delay_for(63), Duration::from_secs(5));
    }

    #[test]
    fn test_cap_never_below_base() {
        let policy = BackoffPolicy::new(Duration::from_secs(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(9), Duration::from_secs(2));
    }
}
