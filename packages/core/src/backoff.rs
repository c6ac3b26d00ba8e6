//! Retry backoff calculation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Compute the delay before retry number `attempt` (1 for the first retry).
///
/// `raw = base * multiplier^(attempt - 1)`, capped at `max`. With `jitter`
/// the capped value is scaled by a uniform factor in `[0.5, 1.0)`, so a retry
/// never waits less than half the nominal delay.
pub fn backoff_delay(
    attempt: u32,
    base: Duration,
    multiplier: f64,
    max: Duration,
    jitter: bool,
) -> Duration {
    let factor = if jitter {
        0.5 + rand::random::<f64>() * 0.5
    } else {
        1.0
    };
    scaled_delay(attempt, base, multiplier, max, factor)
}

/// Deterministic core of [`backoff_delay`] with an explicit jitter factor.
fn scaled_delay(
    attempt: u32,
    base: Duration,
    multiplier: f64,
    max: Duration,
    factor: f64,
) -> Duration {
    let exponent = attempt.max(1) - 1;
    let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);

    let base_ms = base.as_millis() as f64;
    let max_ms = max.as_millis() as f64;
    let raw = base_ms * multiplier.powi(exponent);

    // powi overflows to infinity long before the cap matters
    let capped = if raw.is_finite() { raw.min(max_ms) } else { max_ms };

    Duration::from_millis((capped * factor).round() as u64)
}

/// Backoff parameters for one queue tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
            multiplier: 2.0,
            max_delay: Duration::from_millis(300_000),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff_delay(
            attempt,
            self.base_delay,
            self.multiplier,
            self.max_delay,
            self.jitter,
        )
    }

    /// The nominal (un-jittered) delay before retry number `attempt`.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        scaled_delay(attempt, self.base_delay, self.multiplier, self.max_delay, 1.0)
    }

    /// Same policy with jitter forced on or off.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BASE: Duration = Duration::from_millis(1_000);
    const MAX: Duration = Duration::from_millis(300_000);

    #[test]
    fn exponential_without_jitter() {
        let delay = |attempt| backoff_delay(attempt, BASE, 2.0, MAX, false);

        assert_eq!(delay(1), Duration::from_millis(1_000));
        assert_eq!(delay(2), Duration::from_millis(2_000));
        assert_eq!(delay(3), Duration::from_millis(4_000));
        assert_eq!(delay(9), Duration::from_millis(256_000));
        assert_eq!(delay(10), MAX);
        assert_eq!(delay(u32::MAX), MAX);
    }

    #[test]
    fn attempt_zero_is_treated_as_first_retry() {
        assert_eq!(backoff_delay(0, BASE, 2.0, MAX, false), BASE);
    }

    #[test]
    fn policy_defaults_match_config_defaults() {
        let policy = BackoffPolicy::default().with_jitter(false);
        assert_eq!(policy.delay(1), BASE);
        assert_eq!(policy.capped_delay(20), MAX);
    }

    proptest! {
        #[test]
        fn non_decreasing_until_cap(attempt in 1u32..64) {
            let current = backoff_delay(attempt, BASE, 2.0, MAX, false);
            let next = backoff_delay(attempt + 1, BASE, 2.0, MAX, false);
            prop_assert!(next >= current);
            prop_assert!(next <= MAX);
        }

        #[test]
        fn jitter_stays_within_half_open_band(
            attempt in 1u32..32,
            base_ms in 1u64..10_000,
            multiplier in 1u32..=4,
        ) {
            let base = Duration::from_millis(base_ms);
            let multiplier = f64::from(multiplier);
            let capped = scaled_delay(attempt, base, multiplier, MAX, 1.0).as_millis() as f64;
            let jittered = backoff_delay(attempt, base, multiplier, MAX, true).as_millis() as f64;

            prop_assert!(jittered >= capped * 0.5);
            prop_assert!(jittered <= capped);
        }
    }
}
