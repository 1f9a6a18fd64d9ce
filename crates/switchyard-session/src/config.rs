//! Session tunables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Per-session configuration.
///
/// Durations are written as milliseconds in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for ordinary outbound requests; `None` waits forever
    #[serde(with = "opt_millis")]
    pub request_timeout: Option<Duration>,
    /// Deadline for each attempt of a bridged (server-originated) request
    #[serde(with = "millis")]
    pub bridge_timeout: Duration,
    /// What to do when a bridged request times out
    pub bridge_retry: RetryPolicy,
    /// How long shutdown waits for in-flight handlers
    #[serde(with = "millis")]
    pub shutdown_grace: Duration,
    /// Capacity of the session event channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(60)),
            bridge_timeout: Duration::from_secs(60),
            bridge_retry: RetryPolicy::None,
            shutdown_grace: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

/// Retry schedule for bridged requests that time out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Fail on the first timeout
    #[default]
    None,
    /// Retry up to `retries` times with a constant delay
    Fixed {
        /// Extra attempts after the first
        retries: u32,
        /// Delay between attempts, in milliseconds
        delay_ms: u64,
    },
    /// Retry up to `retries` times, doubling the delay each time
    Exponential {
        /// Extra attempts after the first
        retries: u32,
        /// First delay, in milliseconds
        initial_delay_ms: u64,
        /// Upper bound on the delay, in milliseconds
        max_delay_ms: u64,
    },
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), or `None` when exhausted
    pub fn delay_for(&self, retry: u32) -> Option<Duration> {
        match *self {
            Self::None => None,
            Self::Fixed { retries, delay_ms } => {
                (retry <= retries).then(|| Duration::from_millis(delay_ms))
            }
            Self::Exponential {
                retries,
                initial_delay_ms,
                max_delay_ms,
            } => (retry <= retries).then(|| {
                let factor = 1u64 << (retry - 1).min(32);
                Duration::from_millis(initial_delay_ms.saturating_mul(factor).min(max_delay_ms))
            }),
        }
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

pub(crate) mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_no_retry_by_default() {
        assert_eq!(SessionConfig::default().bridge_retry.delay_for(1), None);
    }

    #[test]
    fn test_fixed_schedule() {
        let p = RetryPolicy::Fixed {
            retries: 2,
            delay_ms: 50,
        };
        assert_eq!(p.delay_for(1), Some(Duration::from_millis(50)));
        assert_eq!(p.delay_for(2), Some(Duration::from_millis(50)));
        assert_eq!(p.delay_for(3), None);
    }

    #[test]
    fn test_exponential_schedule_is_capped() {
        let p = RetryPolicy::Exponential {
            retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 300,
        };
        assert_eq!(p.delay_for(1), Some(Duration::from_millis(100)));
        assert_eq!(p.delay_for(2), Some(Duration::from_millis(200)));
        assert_eq!(p.delay_for(3), Some(Duration::from_millis(300)));
        assert_eq!(p.delay_for(6), None);
    }

    #[test]
    fn test_config_from_millis() {
        let cfg: SessionConfig = serde_json::from_value(serde_json::json!({
            "request_timeout": null,
            "bridge_timeout": 1500,
            "bridge_retry": {"kind": "fixed", "retries": 1, "delay_ms": 10}
        }))
        .unwrap();
        assert_eq!(cfg.request_timeout, None);
        assert_eq!(cfg.bridge_timeout, Duration::from_millis(1500));
        assert_eq!(cfg.shutdown_grace, Duration::from_secs(5));
    }
}
