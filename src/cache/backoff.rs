//! Bounded linear backoff for establishing the store connection

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(100),
            cap: Duration::from_secs(3),
            max_attempts: 10,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    ///
    /// `None` means give up.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        Some(self.base.saturating_mul(attempt).min(self.cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, Some(100))]
    #[case(2, Some(200))]
    #[case(9, Some(900))]
    #[case(10, None)]
    #[case(42, None)]
    fn test_default_delays(#[case] attempt: u32, #[case] expected_ms: Option<u64>) {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.delay(attempt),
            expected_ms.map(Duration::from_millis)
        );
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(3), 100);
        assert_eq!(policy.delay(2), Some(Duration::from_secs(2)));
        assert_eq!(policy.delay(50), Some(Duration::from_secs(3)));
    }
}
