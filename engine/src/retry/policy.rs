//! Retry budget and transient backoff.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay schedule for transient failures. Retries after a source mutation
/// never wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    Fixed {
        delay_ms: u64,
    },
    Exponential {
        base_ms: u64,
        factor: u32,
        cap_ms: u64,
    },
}

impl Backoff {
    /// Delay before the `n`th transient retry (1-based).
    pub fn delay(&self, n: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential {
                base_ms,
                factor,
                cap_ms,
            } => {
                let exp = n.saturating_sub(1);
                let ms = (factor.max(1) as u64)
                    .checked_pow(exp)
                    .and_then(|m| m.checked_mul(base_ms))
                    .unwrap_or(u64::MAX);
                Duration::from_millis(ms.min(cap_ms))
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Fixed { delay_ms: 500 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Highest attempt index a stage may reach; attempt 0 is the first run.
    pub max_retries: u32,
    pub transient_backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            transient_backoff: Backoff::default(),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.transient_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_backoff() {
        let b = Backoff::default();
        assert_eq!(b.delay(1), Duration::from_millis(500));
        assert_eq!(b.delay(3), Duration::from_millis(500));
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let b = Backoff::Exponential {
            base_ms: 100,
            factor: 2,
            cap_ms: 1_000,
        };
        assert_eq!(b.delay(1), Duration::from_millis(100));
        assert_eq!(b.delay(2), Duration::from_millis(200));
        assert_eq!(b.delay(4), Duration::from_millis(800));
        assert_eq!(b.delay(5), Duration::from_millis(1_000));
        assert_eq!(b.delay(80), Duration::from_millis(1_000));
    }

    #[test]
    fn test_policy_deserializes() {
        let policy: RetryPolicy = serde_json::from_str(
            r#"{"max_retries":2,"transient_backoff":{"kind":"exponential","base_ms":50,"factor":3,"cap_ms":400}}"#,
        )
        .unwrap();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.transient_backoff.delay(2), Duration::from_millis(150));
    }
}
