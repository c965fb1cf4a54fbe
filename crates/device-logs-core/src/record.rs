//! Structured log records.

use std::{convert::Infallible, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Reference to a telemetry frame a log line is correlated with.
pub type FrameRef = i64;

/// Log severity.
///
/// Known severities are normalized; anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    /// Severity the device emitted that has no canonical mapping.
    Other(String),
}

impl LogLevel {
    /// Canonical upper-case label.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Trace => "TRACE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::Other(s) => s,
        }
    }
}

impl FromStr for LogLevel {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "TRACE" => Self::Trace,
            "DEBUG" => Self::Debug,
            "INFO" => Self::Info,
            "WARN" | "WARNING" => Self::Warn,
            "ERROR" | "ERR" => Self::Error,
            "FATAL" | "CRITICAL" => Self::Fatal,
            _ => Self::Other(s.to_string()),
        })
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(level) => level,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for LogLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for LogLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from(raw.as_str()))
    }
}

/// A single structured log line received from the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// When the device says the line was written (microsecond precision).
    pub device_timestamp: DateTime<Utc>,
    /// When this host received the line.
    pub host_timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Emitting process/node, when the format carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_aliases() {
        assert_eq!(LogLevel::from("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::from("ERR"), LogLevel::Error);
        assert_eq!(LogLevel::from("Critical"), LogLevel::Fatal);
        assert_eq!(LogLevel::from("info"), LogLevel::Info);
    }

    #[test]
    fn test_unknown_level_is_preserved() {
        let level = LogLevel::from("NOTICE");
        assert_eq!(level, LogLevel::Other("NOTICE".to_string()));
        assert_eq!(level.to_string(), "NOTICE");
    }

    #[test]
    fn test_level_serializes_as_label() {
        let json = serde_json::to_string(&LogLevel::Warn).unwrap();
        assert_eq!(json, "\"WARN\"");

        let parsed: LogLevel = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(parsed, LogLevel::Warn);
    }
}
