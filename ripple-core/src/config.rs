//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Tunables for sessions and the session host.
///
/// Every field has a default, so a partial JSON document is accepted:
///
/// ```rust
/// use ripple_core::SessionConfig;
///
/// let config = SessionConfig::from_json_str(r#"{ "max_sessions": 8 }"#).unwrap();
/// assert_eq!(config.max_sessions, 8);
/// assert_eq!(config.idle_timeout_secs, 1800);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle for longer than this are evicted by the host.
    pub idle_timeout_secs: u64,

    /// Upper bound on live sessions; the least recently used is evicted
    /// when a new one connects past the limit.
    pub max_sessions: usize,

    /// Capacity of each session's command channel.
    pub event_queue_capacity: usize,

    /// How often updates posted by background tasks are flushed.
    pub background_flush_interval_ms: u64,

    /// Maximum number of recompute rounds in a single flush.
    pub max_flush_rounds: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 1800,
            max_sessions: 1000,
            event_queue_capacity: 256,
            background_flush_interval_ms: 200,
            max_flush_rounds: 16,
        }
    }
}

impl SessionConfig {
    /// Parse a configuration from JSON, filling missing fields with defaults.
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(Error::Config)
    }

    /// Idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Background flush interval as a [`Duration`].
    pub fn background_flush_interval(&self) -> Duration {
        Duration::from_millis(self.background_flush_interval_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = SessionConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SessionConfig::default());
    }

    #[test]
    fn rejects_malformed_json() {
        let err = SessionConfig::from_json_str("{ max_sessions: ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn zero_interval_is_clamped() {
        let config = SessionConfig {
            background_flush_interval_ms: 0,
            ..SessionConfig::default()
        };
        assert_eq!(config.background_flush_interval(), Duration::from_millis(1));
    }
}
