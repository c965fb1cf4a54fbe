//! Timestamp normalization.

use chrono::{DateTime, NaiveDateTime, Utc};

/// Maximum fractional-second digits kept (microseconds).
const MAX_FRACTION_DIGITS: usize = 6;

/// Parse a device timestamp into UTC with at most microsecond precision.
///
/// Accepts `T`- or space-separated date and time, an optional trailing `Z`,
/// and any number of fractional digits (extra digits are truncated, not
/// rounded). Zone-less timestamps are taken as UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let raw = raw.strip_suffix('Z').unwrap_or(raw);

    let normalized = truncate_fraction(&raw.replacen('T', " ", 1));
    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn truncate_fraction(raw: &str) -> String {
    let Some(dot) = raw.rfind('.') else {
        return raw.to_string();
    };
    let (head, fraction) = raw.split_at(dot + 1);
    let digits = fraction.bytes().take_while(u8::is_ascii_digit).count();
    if digits <= MAX_FRACTION_DIGITS {
        return raw.to_string();
    }
    format!(
        "{head}{}{}",
        &fraction[..MAX_FRACTION_DIGITS],
        &fraction[digits..]
    )
}
