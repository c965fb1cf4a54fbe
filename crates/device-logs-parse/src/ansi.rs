//! Terminal escape sequence removal.

use std::{borrow::Cow, sync::LazyLock};

use regex::Regex;

// ESC, then a Fe byte, parameter bytes, intermediate bytes and a final byte.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1B[@-_][0-?]*[ -/]*[@-~]").expect("valid escape pattern")
});

/// Remove ANSI/terminal escape sequences from `line`.
#[must_use]
pub fn strip_ansi(line: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(line, "")
}
