//! Log records as shipped to the collector.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::Level;

/// A single log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub level: String,
    pub source: String,
    pub message: String,
    /// RFC 3339 timestamp with millisecond precision.
    pub time: String,
}

impl Record {
    /// Build a record stamped with the current time.
    pub fn new(level: Level, source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: level.as_str().to_lowercase(),
            source: source.into(),
            message: message.into(),
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn info(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(Level::INFO, source, message)
    }
}
