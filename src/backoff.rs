//! Exponential backoff with optional additive jitter.

use std::time::Duration;

/// Fallback used when a zero base delay is supplied.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Fallback used when a zero delay cap is supplied.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Jitter adds at most this fraction of the capped delay.
const MAX_JITTER_FRACTION: f64 = 0.1;
const MAX_JITTER_SAMPLE: f64 = 0.999_999;

/// Computes the delay before retry number `attempt` (0-based).
///
/// The deterministic part is `min(base_delay * 2^attempt, max_delay)`. With
/// `jitter` enabled up to 10% of that value is added, scaled by
/// `jitter_sample`, which is expected in `[0, 1)` and clamped otherwise.
/// Jitter only ever lengthens the delay.
///
/// Zero delays fall back to [`DEFAULT_BASE_DELAY`] / [`DEFAULT_MAX_DELAY`];
/// this function never fails.
pub fn delay(
    attempt: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    jitter_sample: f64,
) -> Duration {
    let base_delay = if base_delay.is_zero() {
        DEFAULT_BASE_DELAY
    } else {
        base_delay
    };
    let max_delay = if max_delay.is_zero() {
        DEFAULT_MAX_DELAY
    } else {
        max_delay
    };

    let multiplier = 1u32.checked_shl(attempt).unwrap_or(0);
    let capped = match base_delay.checked_mul(multiplier) {
        Some(scaled) if multiplier != 0 => scaled.min(max_delay),
        _ => max_delay,
    };

    if !jitter {
        return capped;
    }

    let sample = if jitter_sample.is_finite() {
        jitter_sample.clamp(0.0, MAX_JITTER_SAMPLE)
    } else {
        0.0
    };
    capped.saturating_add(capped.mul_f64(MAX_JITTER_FRACTION * sample))
}

#[cfg(test)]
mod tests {
    use super::{delay, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
    use std::time::Duration;

    const SECOND: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(30);

    #[test]
    fn doubles_per_attempt_without_jitter() {
        assert_eq!(delay(0, SECOND, CAP, false, 0.0), SECOND);
        assert_eq!(delay(1, SECOND, CAP, false, 0.0), 2 * SECOND);
        assert_eq!(delay(2, SECOND, CAP, false, 0.0), 4 * SECOND);
        assert_eq!(delay(4, SECOND, CAP, false, 0.0), 16 * SECOND);
    }

    #[test]
    fn caps_at_max_delay_and_stays_monotonic() {
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let current = delay(attempt, SECOND, CAP, false, 0.0);
            assert!(current >= previous, "attempt {attempt} decreased");
            assert!(current <= CAP);
            previous = current;
        }
        assert_eq!(delay(5, SECOND, CAP, false, 0.0), CAP);
        assert_eq!(delay(200, SECOND, CAP, false, 0.0), CAP);
    }

    #[test]
    fn zero_delays_fall_back_to_defaults() {
        assert_eq!(
            delay(0, Duration::ZERO, Duration::ZERO, false, 0.0),
            DEFAULT_BASE_DELAY
        );
        assert_eq!(
            delay(10, Duration::ZERO, Duration::ZERO, false, 0.0),
            DEFAULT_MAX_DELAY
        );
    }

    #[test]
    fn jitter_is_additive_and_bounded() {
        for attempt in 0..8 {
            let plain = delay(attempt, SECOND, CAP, false, 0.0);
            for sample in [0.0, 0.25, 0.5, 0.75, 0.999, 1.0, 7.0, -3.0, f64::NAN] {
                let jittered = delay(attempt, SECOND, CAP, true, sample);
                assert!(jittered >= plain);
                assert!(jittered <= plain + plain.mul_f64(0.1));
            }
        }
    }

    #[test]
    fn jitter_scales_with_sample() {
        assert_eq!(
            delay(0, SECOND, CAP, true, 0.5),
            SECOND + Duration::from_millis(50)
        );
        assert_eq!(delay(0, SECOND, CAP, true, 0.0), SECOND);
    }

    #[test]
    fn jitter_saturates_near_duration_max() {
        assert_eq!(
            delay(0, Duration::MAX, Duration::MAX, true, 0.5),
            Duration::MAX
        );
        assert_eq!(
            delay(63, SECOND, Duration::MAX, true, 0.999),
            Duration::MAX
        );
    }
}
