//! Line format matchers.

use chrono::{DateTime, Utc};
use device_logs_core::{LogLevel, LogRecord};
use regex::Regex;

use crate::timestamp::parse_timestamp;

/// Device-side fields of a parsed line.
///
/// Carries no receipt time, so parsing the same line twice yields equal
/// values; the pipeline stamps the host time with [`ParsedLog::received_at`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLog {
    pub device_timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub component: Option<String>,
}

impl ParsedLog {
    /// Complete the record with the time this host received the line.
    #[must_use]
    pub fn received_at(self, host_timestamp: DateTime<Utc>) -> LogRecord {
        LogRecord {
            device_timestamp: self.device_timestamp,
            host_timestamp,
            level: self.level,
            message: self.message,
            component: self.component,
        }
    }
}

/// A single line format.
///
/// `line` has already had escape sequences and surrounding whitespace
/// removed.
pub trait FormatMatcher: Send + Sync {
    /// Short identifier used in diagnostics.
    fn name(&self) -> &str;

    fn try_match(&self, line: &str) -> Option<ParsedLog>;
}

/// Matcher driven by a regex with named groups.
///
/// Required groups: `ts`, `msg`. Optional: `level` (absent means DEBUG),
/// `component`.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    name: String,
    regex: Regex,
}

impl RegexMatcher {
    /// Compile a matcher.
    ///
    /// # Errors
    /// Returns error if the pattern is invalid.
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            regex: Regex::new(pattern)?,
        })
    }
}

impl FormatMatcher for RegexMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_match(&self, line: &str) -> Option<ParsedLog> {
        let caps = self.regex.captures(line)?;
        let device_timestamp = parse_timestamp(caps.name("ts")?.as_str())?;
        let level = caps
            .name("level")
            .map_or(LogLevel::Debug, |m| LogLevel::from(m.as_str()));
        let message = caps.name("msg")?.as_str().trim().to_string();
        let component = caps.name("component").map(|m| m.as_str().to_string());

        Some(ParsedLog {
            device_timestamp,
            level,
            message,
            component,
        })
    }
}

const ISO_Z: &str = r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?Z";
const PLAIN: &str = r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?";

/// The built-in formats, in evaluation order.
///
/// 1. `plain`: `2024-04-09 13:38:32.723 INFO message`
/// 2. `ros`: `<iso>Z [component] <device-relative secs> LEVEL message`
/// 3. `nested`: `<iso>Z <date time> LEVEL message`, outer stamp wins
/// 4. `component`: `<iso>Z [component] message`, DEBUG
#[must_use]
pub fn builtin_matchers() -> Vec<Box<dyn FormatMatcher>> {
    let patterns = [
        (
            "plain",
            r"^(?P<ts>\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}\.\d{3})\s+(?P<level>[A-Za-z]+)\s+(?P<msg>.+)$"
                .to_string(),
        ),
        (
            "ros",
            format!(
                r"^(?P<ts>{ISO_Z})\s+\[(?P<component>[^\]]+)\]\s+\d+(?:\.\d+)?\s+(?P<level>[A-Z]+)\s+(?P<msg>.+)$"
            ),
        ),
        (
            "nested",
            format!(r"^(?P<ts>{ISO_Z})\s+{PLAIN}\s+(?P<level>[A-Za-z]+)\s+(?P<msg>.+)$"),
        ),
        (
            "component",
            format!(r"^(?P<ts>{ISO_Z})\s+\[(?P<component>[^\]]+)\]\s+(?P<msg>.+)$"),
        ),
    ];

    patterns
        .into_iter()
        .map(|(name, pattern)| {
            let matcher = RegexMatcher::new(name, &pattern).expect("valid built-in pattern");
            Box::new(matcher) as Box<dyn FormatMatcher>
        })
        .collect()
}
