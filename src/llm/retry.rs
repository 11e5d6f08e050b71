//! Bounded retry with exponential backoff and jitter

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (2 → up to 3 attempts total)
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Fractional jitter applied symmetrically (0.2 → ±20%)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            ..Self::default()
        }
    }

    /// Delay before retrying `attempt` (0-based): base · 2^attempt ± jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
        let spread = 1.0 + self.jitter * (2.0 * rand::random::<f64>() - 1.0);
        Duration::from_millis((exp * spread).max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_exponentially() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(200),
            jitter: 0.0,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(200));
        assert_eq!(policy.backoff(1), Duration::from_millis(400));
        assert_eq!(policy.backoff(2), Duration::from_millis(800));
    }

    #[test]
    fn test_jitter_stays_within_band() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1000),
            jitter: 0.2,
        };
        for _ in 0..100 {
            let d = policy.backoff(0).as_millis() as f64;
            assert!((800.0..=1200.0).contains(&d), "delay {d} outside jitter band");
        }
    }
}
