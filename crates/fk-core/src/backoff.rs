//! Exponential backoff with jitter for reconcile retries

use std::time::Duration;

/// Retry strategy for a forward's reconcile loop.
///
/// The delay for attempt `a` is `min(max_delay, initial_delay * multiplier^a)`,
/// perturbed by a uniform ±10% when jitter is enabled. The attempt counter
/// itself lives in the session; it resets only when a tunnel reaches Ready.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling for the computed delay
    pub max_delay: Duration,
    /// Exponential growth factor
    pub multiplier: f64,
    /// Perturb each delay by a uniform ±10%
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 1.5,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Compute the delay for the given attempt number (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        let secs = if self.jitter {
            // Uniform in [0.9, 1.1] of the capped delay
            capped * (0.9 + 0.2 * rand::random::<f64>())
        } else {
            capped
        };

        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 1.5,
            jitter: false,
        }
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let retry = no_jitter();
        assert_eq!(retry.delay(0), Duration::from_millis(100));
        assert_eq!(retry.delay(1), Duration::from_millis(150));
        assert_eq!(retry.delay(2), Duration::from_millis(225));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let retry = no_jitter();
        // 0.1 * 1.5^20 is well past 30s
        assert_eq!(retry.delay(20), Duration::from_secs(30));
        assert_eq!(retry.delay(1000), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_ten_percent() {
        let retry = RetryConfig {
            jitter: true,
            ..no_jitter()
        };
        for attempt in [0, 3, 20] {
            let expected = no_jitter().delay(attempt).as_secs_f64();
            for _ in 0..200 {
                let d = retry.delay(attempt).as_secs_f64();
                assert!(d >= expected * 0.9 - 1e-9, "delay {d} below bound");
                assert!(d <= expected * 1.1 + 1e-9, "delay {d} above bound");
            }
        }
    }
}
