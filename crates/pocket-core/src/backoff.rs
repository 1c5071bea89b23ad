//! # Retry Backoff
//!
//! One delay function shared by the action queue's retry scheduling and the
//! subscription manager's reconnect timer, so both halves of the engine obey
//! the same discipline: `min(base * 2^(attempt - 1), max)`.
//!
//! ```text
//! attempt 1 → base            (1s with defaults)
//! attempt 2 → base * 2        (2s)
//! attempt 3 → base * 4        (4s)
//! ...
//! attempt N → capped at max   (30s with defaults)
//! ```

use std::time::Duration;

/// Default base delay: 1 second.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(1_000);

/// Default delay ceiling: 30 seconds.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Delay to wait before the `attempt`-th retry (1-based).
///
/// `attempt = 0` is treated as 1 so a miscounted caller still gets the base
/// delay rather than a zero-length sleep.
pub fn retry_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).min(63);
    let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
    let delay = base.saturating_mul(factor.min(u32::MAX as u64) as u32);
    delay.min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let base = Duration::from_millis(1_000);
        let max = Duration::from_millis(30_000);
        assert_eq!(retry_delay(1, base, max), Duration::from_millis(1_000));
        assert_eq!(retry_delay(2, base, max), Duration::from_millis(2_000));
        assert_eq!(retry_delay(3, base, max), Duration::from_millis(4_000));
        assert_eq!(retry_delay(4, base, max), Duration::from_millis(8_000));
        assert_eq!(retry_delay(5, base, max), Duration::from_millis(16_000));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let base = Duration::from_millis(1_000);
        let max = Duration::from_millis(30_000);
        assert_eq!(retry_delay(6, base, max), max);
        assert_eq!(retry_delay(20, base, max), max);
        assert_eq!(retry_delay(u32::MAX, base, max), max);
    }

    #[test]
    fn test_delay_is_monotone() {
        let base = Duration::from_millis(250);
        let max = Duration::from_secs(60);
        let mut previous = Duration::ZERO;
        for attempt in 1..32 {
            let d = retry_delay(attempt, base, max);
            assert!(d >= previous, "attempt {attempt} regressed");
            previous = d;
        }
    }

    #[test]
    fn test_zero_attempt_gets_base_delay() {
        let base = Duration::from_millis(1_000);
        assert_eq!(retry_delay(0, base, DEFAULT_MAX_DELAY), base);
    }
}
