//! Multi-format log line parser.

use crate::{
    ansi::strip_ansi,
    matcher::{FormatMatcher, ParsedLog, builtin_matchers},
};

/// Converts raw lines into structured logs.
///
/// Matchers are evaluated in order and the first match wins. Adding a
/// format means pushing another matcher; nothing upstream changes.
pub struct LogParser {
    matchers: Vec<Box<dyn FormatMatcher>>,
}

impl Default for LogParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LogParser {
    /// Create a parser with the built-in formats.
    #[must_use]
    pub fn new() -> Self {
        Self {
            matchers: builtin_matchers(),
        }
    }

    /// Create a parser with no formats.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            matchers: Vec::new(),
        }
    }

    /// Append a matcher, evaluated after the existing ones.
    #[must_use]
    pub fn with_matcher(mut self, matcher: impl FormatMatcher + 'static) -> Self {
        self.matchers.push(Box::new(matcher));
        self
    }

    /// Names of the matchers in evaluation order.
    pub fn matcher_names(&self) -> impl Iterator<Item = &str> {
        self.matchers.iter().map(|m| m.name())
    }

    /// Parse one line. `None` means no format matched.
    #[must_use]
    pub fn parse(&self, line: &str) -> Option<ParsedLog> {
        let stripped = strip_ansi(line);
        let clean = stripped.trim();
        if clean.is_empty() {
            return None;
        }

        self.matchers.iter().find_map(|matcher| {
            let parsed = matcher.try_match(clean)?;
            tracing::trace!(format = matcher.name(), "Matched log line");
            Some(parsed)
        })
    }
}
