use duration_str::deserialize_duration;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const DEFAULT_CAP_DELAY: Duration = Duration::from_secs(16);
const DEFAULT_JITTER: f64 = 0.2;

/// Exponential backoff with symmetric jitter.
///
/// The delay for the k-th consecutive failure is
/// `min(base * 2^(k-1), cap)` scaled by a uniformly random factor in
/// `[1 - jitter, 1 + jitter]`. The jitter keeps a herd of failing processes
/// from re-syncing in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    #[serde(deserialize_with = "deserialize_duration")]
    pub base: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub cap: Duration,
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE_DELAY,
            cap: DEFAULT_CAP_DELAY,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, jitter: f64) -> Self {
        Self { base, cap, jitter }
    }

    /// Delay before the given attempt (1-based). Attempt 0 is treated as 1.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.max(1) - 1;
        let uncapped = self
            .base
            .checked_mul(2u32.saturating_pow(exponent))
            .unwrap_or(self.cap);
        let capped = uncapped.min(self.cap);

        if self.jitter <= 0.0 {
            return capped;
        }
        let factor = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        capped.mul_f64(factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(1, Duration::from_secs(1))]
    #[case(2, Duration::from_secs(2))]
    #[case(3, Duration::from_secs(4))]
    #[case(4, Duration::from_secs(8))]
    #[case(5, Duration::from_secs(16))]
    #[case(6, Duration::from_secs(16))] // capped
    #[case(0, Duration::from_secs(1))] // attempt 0 behaves as 1
    fn deterministic_without_jitter(#[case] attempt: u32, #[case] expected: Duration) {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(16), 0.0);
        assert_eq!(policy.delay(attempt), expected);
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = BackoffPolicy::default();
        for attempt in 1..=8 {
            let raw = Duration::from_secs(1) * 2u32.pow(attempt - 1);
            let capped = raw.min(Duration::from_secs(16));
            for _ in 0..100 {
                let delay = policy.delay(attempt);
                assert!(delay >= capped.mul_f64(0.8), "attempt {attempt}: {delay:?}");
                assert!(delay <= capped.mul_f64(1.2), "attempt {attempt}: {delay:?}");
            }
        }
    }

    #[test]
    fn huge_attempt_does_not_overflow() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(16), 0.0);
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(16));
    }
}
