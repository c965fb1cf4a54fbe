//! Monotonic ordering filter.

use device_logs_core::LogRecord;

/// Whether `record` is new enough to persist given the last persisted one.
///
/// Only strictly newer device timestamps pass; equal timestamps are treated
/// as duplicates. With nothing persisted yet, everything passes.
#[must_use]
pub fn should_persist(record: &LogRecord, last_persisted: Option<&LogRecord>) -> bool {
    last_persisted.is_none_or(|last| record.device_timestamp > last.device_timestamp)
}
