//! Line → record → sink.

use std::sync::Arc;

use chrono::Utc;
use device_logs_core::{LogRecord, LogSink, SinkError};
use device_logs_parse::{LogParser, should_persist};

/// Admits a record only if it is strictly newer than the last persisted one.
///
/// The sink is the source of truth for "last persisted", so ordering holds
/// across reconnects and restarts.
pub struct OrderGuard {
    sink: Arc<dyn LogSink>,
}

impl OrderGuard {
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Whether `record` may be persisted.
    ///
    /// # Errors
    /// Returns error if the sink cannot report its latest record.
    pub async fn admit(&self, record: &LogRecord) -> Result<bool, SinkError> {
        let last = self.sink.get_latest_log().await?;
        let admitted = should_persist(record, last.as_ref());
        if !admitted {
            tracing::warn!(
                device_timestamp = %record.device_timestamp,
                last = ?last.as_ref().map(|r| r.device_timestamp),
                message = %record.message,
                "Dropping out-of-order log line"
            );
        }
        Ok(admitted)
    }
}

/// What happened to one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Persisted,
    /// No format matched.
    Unparsed,
    /// Not newer than the last persisted record.
    Rejected,
    Blank,
}

/// Parses complete lines and persists the ones that pass ordering.
pub struct RecordPipeline {
    parser: Arc<LogParser>,
    guard: OrderGuard,
    sink: Arc<dyn LogSink>,
}

impl RecordPipeline {
    #[must_use]
    pub fn new(parser: Arc<LogParser>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            parser,
            guard: OrderGuard::new(Arc::clone(&sink)),
            sink,
        }
    }

    /// Handle one complete line.
    ///
    /// # Errors
    /// Returns error if the sink fails; the line is then lost.
    pub async fn handle_line(&self, line: &str) -> Result<LineOutcome, SinkError> {
        if line.trim().is_empty() {
            return Ok(LineOutcome::Blank);
        }

        let Some(parsed) = self.parser.parse(line) else {
            tracing::warn!(line, "Unparseable log line");
            return Ok(LineOutcome::Unparsed);
        };
        let record = parsed.received_at(Utc::now());

        if !self.guard.admit(&record).await? {
            return Ok(LineOutcome::Rejected);
        }

        let frame = self.sink.current_frame().await?;
        self.sink.insert_log(frame, &record).await?;
        tracing::trace!(
            level = %record.level,
            device_timestamp = %record.device_timestamp,
            "Persisted log line"
        );
        Ok(LineOutcome::Persisted)
    }
}

#[cfg(test)]
mod tests {
    use device_logs_core::LogLevel;

    use super::*;
    use crate::storage::MemorySink;

    fn pipeline() -> (RecordPipeline, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let pipeline = RecordPipeline::new(Arc::new(LogParser::new()), sink.clone());
        (pipeline, sink)
    }

    #[tokio::test]
    async fn test_persists_parsed_line() {
        let (pipeline, sink) = pipeline();
        let outcome = pipeline
            .handle_line("2024-04-09 13:38:32.723 ERROR motor stalled")
            .await
            .unwrap();

        assert_eq!(outcome, LineOutcome::Persisted);
        let latest = sink.get_latest_log().await.unwrap().unwrap();
        assert_eq!(latest.level, LogLevel::Error);
        assert_eq!(latest.message, "motor stalled");
    }

    #[tokio::test]
    async fn test_rejects_equal_and_older() {
        let (pipeline, sink) = pipeline();
        pipeline
            .handle_line("2024-04-09 13:38:32.723 INFO second")
            .await
            .unwrap();

        let equal = pipeline
            .handle_line("2024-04-09 13:38:32.723 INFO again")
            .await
            .unwrap();
        let older = pipeline
            .handle_line("2024-04-09 13:38:31.000 INFO first")
            .await
            .unwrap();

        assert_eq!(equal, LineOutcome::Rejected);
        assert_eq!(older, LineOutcome::Rejected);
        assert_eq!(sink.messages().unwrap(), ["second"]);
    }

    #[tokio::test]
    async fn test_unparsed_and_blank_are_not_persisted() {
        let (pipeline, sink) = pipeline();
        assert_eq!(
            pipeline.handle_line("no timestamp here").await.unwrap(),
            LineOutcome::Unparsed
        );
        assert_eq!(pipeline.handle_line("  ").await.unwrap(), LineOutcome::Blank);
        assert!(sink.records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_records_carry_current_frame() {
        let (pipeline, sink) = pipeline();
        sink.set_frame(Some(7)).unwrap();
        pipeline
            .handle_line("2024-07-25T14:16:38.182418000Z [nav] replanning")
            .await
            .unwrap();

        let records = sink.records().unwrap();
        assert_eq!(records[0].0, Some(7));
        assert_eq!(records[0].1.component.as_deref(), Some("nav"));
    }
}
