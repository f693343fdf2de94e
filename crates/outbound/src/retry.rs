//! Retry delays with exponential back-off and relative jitter.

use std::time::Duration;

use rand::Rng;
use wsbridge_registry::OutgoingSettings;

/// Retry schedule of one outgoing channel.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    /// Base delay before the first retry.
    pub delay: Duration,
    /// Multiplier applied to the base delay for each further retry.
    pub backoff_factor: f64,
    /// Cap for the base delay, applied before jitter.
    pub max_delay: Duration,
    /// Relative jitter in `[0, 1]`; the delay is scaled by `1 ± jitter`.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_settings(settings: &OutgoingSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            delay: settings.delay,
            backoff_factor: settings.backoff_factor,
            max_delay: settings.max_delay,
            jitter: settings.jitter,
        }
    }

    /// Base delay before retry `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let secs = self.delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped.max(0.0)).unwrap_or(self.max_delay)
    }

    /// Delay before retry `retry` (1-based): the base delay scaled by a
    /// factor drawn uniformly from `[1 - jitter, 1 + jitter]`.
    pub fn delay_for_retry<R: Rng + ?Sized>(&self, retry: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(retry);
        let jitter = self.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            1.0 + rng.gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        Duration::try_from_secs_f64((base.as_secs_f64() * factor).max(0.0)).unwrap_or(base)
    }

    /// Returns `true` if another retry is allowed after `retries` retries.
    pub fn allows(&self, retries: u32) -> bool {
        retries < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&OutgoingSettings::new("ws://localhost"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn policy(delay_ms: u64, factor: f64, max_ms: u64, jitter: f64) -> RetryPolicy {
        RetryPolicy {
            max_retries: 5,
            delay: Duration::from_millis(delay_ms),
            backoff_factor: factor,
            max_delay: Duration::from_millis(max_ms),
            jitter,
        }
    }

    #[test]
    fn defaults_match_channel_defaults() {
        let p = RetryPolicy::default();
        assert_eq!(p.max_retries, 1);
        assert_eq!(p.delay, Duration::from_secs(1));
        assert!((p.jitter - 0.5).abs() < f64::EPSILON);
        assert!((p.backoff_factor - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn constant_delay_without_backoff() {
        let p = policy(500, 1.0, 30_000, 0.0);
        for retry in 1..=5 {
            assert_eq!(p.base_delay(retry), Duration::from_millis(500));
        }
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let p = policy(250, 2.0, 1_500, 0.0);
        let expected = [250, 500, 1_000, 1_500, 1_500];
        for (i, ms) in expected.iter().enumerate() {
            assert_eq!(p.base_delay(i as u32 + 1), Duration::from_millis(*ms));
        }
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let p = policy(1_000, 2.0, 30_000, 0.5);
        let mut rng = StdRng::seed_from_u64(7);
        for retry in 1..=4 {
            let base = p.base_delay(retry).as_secs_f64();
            for _ in 0..200 {
                let d = p.delay_for_retry(retry, &mut rng).as_secs_f64();
                assert!(
                    d >= base * 0.5 - 1e-9 && d <= base * 1.5 + 1e-9,
                    "retry {retry}: {d:.3}s not in [{:.3}, {:.3}]",
                    base * 0.5,
                    base * 1.5
                );
            }
        }
    }

    #[test]
    fn jitter_actually_varies_delay() {
        let p = policy(1_000, 1.0, 30_000, 0.5);
        let mut rng = StdRng::seed_from_u64(42);
        let first = p.delay_for_retry(1, &mut rng);
        let differs = (0..20).any(|_| p.delay_for_retry(1, &mut rng) != first);
        assert!(differs);
    }

    #[test]
    fn full_jitter_never_goes_negative() {
        let p = policy(100, 1.0, 30_000, 1.0);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..500 {
            assert!(p.delay_for_retry(1, &mut rng) <= Duration::from_millis(200));
        }
    }

    #[test]
    fn huge_delays_do_not_overflow() {
        let p = RetryPolicy {
            max_retries: 64,
            delay: Duration::MAX,
            backoff_factor: 10.0,
            max_delay: Duration::MAX,
            jitter: 1.0,
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(p.base_delay(64), Duration::MAX);
        assert!(p.delay_for_retry(64, &mut rng) > Duration::ZERO);
    }

    #[test]
    fn allows_counts_retries_after_first_attempt() {
        let mut p = policy(10, 1.0, 10, 0.0);
        p.max_retries = 2;
        assert!(p.allows(0));
        assert!(p.allows(1));
        assert!(!p.allows(2));

        p.max_retries = 0;
        assert!(!p.allows(0));
    }
}
