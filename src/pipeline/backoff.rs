//! Delay policy between automated attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long to wait before the n-th automated retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RetryBackoff {
    /// Retry immediately.
    #[default]
    None,
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },
    /// `base_ms * 2^(attempt - 1)`, capped at `max_ms`.
    Exponential { base_ms: u64, max_ms: u64 },
}

impl RetryBackoff {
    /// Delay before retry number `attempt` (1-based). Attempt 0 is the
    /// initial try and never waits.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        match *self {
            RetryBackoff::None => Duration::ZERO,
            RetryBackoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            RetryBackoff::Exponential { base_ms, max_ms } => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
            }
        }
    }

    /// Longest delay this policy can ever produce.
    pub fn longest_delay(&self) -> Duration {
        match *self {
            RetryBackoff::None => Duration::ZERO,
            RetryBackoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            RetryBackoff::Exponential { max_ms, .. } => Duration::from_millis(max_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_never_waits() {
        assert_eq!(RetryBackoff::None.delay_for(5), Duration::ZERO);
    }

    #[test]
    fn test_fixed() {
        let backoff = RetryBackoff::Fixed { delay_ms: 250 };
        assert_eq!(backoff.delay_for(0), Duration::ZERO);
        assert_eq!(backoff.delay_for(1), Duration::from_millis(250));
        assert_eq!(backoff.delay_for(7), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_is_capped() {
        let backoff = RetryBackoff::Exponential {
            base_ms: 100,
            max_ms: 1_000,
        };
        assert_eq!(backoff.delay_for(1), Duration::from_millis(100));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
        assert_eq!(backoff.delay_for(4), Duration::from_millis(800));
        assert_eq!(backoff.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(backoff.delay_for(80), Duration::from_millis(1_000));
    }

    #[test]
    fn test_longest_delay() {
        assert_eq!(RetryBackoff::None.longest_delay(), Duration::ZERO);
        assert_eq!(
            RetryBackoff::Fixed { delay_ms: 40 }.longest_delay(),
            Duration::from_millis(40)
        );
        let backoff = RetryBackoff::Exponential {
            base_ms: 5_000,
            max_ms: 2_000,
        };
        assert_eq!(backoff.longest_delay(), Duration::from_millis(2_000));
        assert_eq!(backoff.delay_for(1), backoff.longest_delay());
    }

    #[test]
    fn test_serde_shape() {
        let parsed: RetryBackoff =
            serde_json::from_str(r#"{"kind": "exponential", "base_ms": 50, "max_ms": 400}"#).unwrap();
        assert_eq!(
            parsed,
            RetryBackoff::Exponential {
                base_ms: 50,
                max_ms: 400
            }
        );
        let none: RetryBackoff = serde_json::from_str(r#"{"kind": "none"}"#).unwrap();
        assert_eq!(none, RetryBackoff::None);
    }
}
