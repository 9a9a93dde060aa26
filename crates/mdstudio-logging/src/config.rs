//! Shipper configuration.

use std::time::Duration;

use mdstudio_core::{Error, FailureKind, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Flush and retry tuning for a [`LogShipper`](crate::LogShipper).
///
/// All durations are in milliseconds so the config can be read from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipperConfig {
    /// Buffers at or above this size are shipped without debouncing.
    pub flush_threshold: usize,
    /// Wait before shipping a small buffer.
    pub debounce_ms: u64,
    /// Period of the background flusher.
    pub flush_interval_ms: u64,
    /// Waits before each retry after a timeout.
    pub timeout_retry_ms: Vec<u64>,
    /// Waits before each retry after an application-level rejection.
    pub application_retry_ms: Vec<u64>,
    /// Waits before each retry after a lost transport or remote exception.
    pub transport_retry_ms: Vec<u64>,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            flush_threshold: 10,
            debounce_ms: 1000,
            flush_interval_ms: 1000,
            timeout_retry_ms: vec![3000, 1000],
            application_retry_ms: vec![1000],
            transport_retry_ms: vec![1000, 1000],
        }
    }
}

impl ShipperConfig {
    /// Parse a JSON config; missing fields keep their defaults.
    ///
    /// # Errors
    /// Returns an error if `json` is not a valid config object.
    pub fn from_json(json: &str) -> Result<Self> {
        match serde_json::from_str(json)? {
            object @ Value::Object(_) => Ok(serde_json::from_value(object)?),
            other => Err(Error::failed(format!(
                "shipper config must be a JSON object, got {other}"
            ))),
        }
    }

    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    #[must_use]
    pub const fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Wait before retry number `attempt` (0-based) after a failure of `kind`.
    ///
    /// `None` means the failure is not retried (again).
    #[must_use]
    pub fn retry_wait(&self, kind: FailureKind, attempt: usize) -> Option<Duration> {
        let waits = match kind {
            FailureKind::Timeout => &self.timeout_retry_ms,
            FailureKind::Application => &self.application_retry_ms,
            FailureKind::Transport => &self.transport_retry_ms,
            FailureKind::Logic | FailureKind::Refreshing | FailureKind::Unclassified => {
                return None;
            }
        };
        waits.get(attempt).copied().map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let config = ShipperConfig::default();
        assert_eq!(
            config.retry_wait(FailureKind::Timeout, 0),
            Some(Duration::from_secs(3))
        );
        assert_eq!(
            config.retry_wait(FailureKind::Timeout, 1),
            Some(Duration::from_secs(1))
        );
        assert_eq!(config.retry_wait(FailureKind::Timeout, 2), None);
        assert_eq!(config.retry_wait(FailureKind::Application, 1), None);
        assert_eq!(config.retry_wait(FailureKind::Unclassified, 0), None);
        assert_eq!(config.retry_wait(FailureKind::Logic, 0), None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ShipperConfig::from_json(r#"{"flush_threshold": 3, "timeout_retry_ms": []}"#)
            .unwrap();
        assert_eq!(config.flush_threshold, 3);
        assert_eq!(config.debounce(), Duration::from_secs(1));
        assert_eq!(config.retry_wait(FailureKind::Timeout, 0), None);
        assert_eq!(
            config.retry_wait(FailureKind::Transport, 1),
            Some(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            ShipperConfig::from_json("[1, 2]"),
            Err(Error::Failed(_))
        ));
        assert!(ShipperConfig::from_json("3").is_err());
        assert!(matches!(
            ShipperConfig::from_json(r#"{"flush_threshold": "ten"}"#),
            Err(Error::Json(_))
        ));
    }
}
