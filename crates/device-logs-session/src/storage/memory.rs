//! In-memory log sink.

use std::sync::RwLock;

use async_trait::async_trait;
use device_logs_core::{FrameRef, LogRecord, LogSink, SinkError};

/// In-memory sink.
///
/// Useful for development and tests. Data is lost on restart.
pub struct MemorySink {
    records: RwLock<Vec<(Option<FrameRef>, LogRecord)>>,
    frame: RwLock<Option<FrameRef>>,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            frame: RwLock::new(None),
        }
    }

    /// Set the frame subsequent records are correlated with.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn set_frame(&self, frame: Option<FrameRef>) -> Result<(), SinkError> {
        *self
            .frame
            .write()
            .map_err(|e| SinkError::Backend(e.to_string()))? = frame;
        Ok(())
    }

    /// Everything persisted so far, in insertion order.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn records(&self) -> Result<Vec<(Option<FrameRef>, LogRecord)>, SinkError> {
        Ok(self
            .records
            .read()
            .map_err(|e| SinkError::Backend(e.to_string()))?
            .clone())
    }

    /// Persisted messages, in insertion order.
    ///
    /// # Errors
    /// Returns error if the lock is poisoned.
    pub fn messages(&self) -> Result<Vec<String>, SinkError> {
        Ok(self
            .records()?
            .into_iter()
            .map(|(_, record)| record.message)
            .collect())
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn insert_log(
        &self,
        frame: Option<FrameRef>,
        record: &LogRecord,
    ) -> Result<(), SinkError> {
        self.records
            .write()
            .map_err(|e| SinkError::Backend(e.to_string()))?
            .push((frame, record.clone()));
        Ok(())
    }

    async fn get_latest_log(&self) -> Result<Option<LogRecord>, SinkError> {
        Ok(self
            .records
            .read()
            .map_err(|e| SinkError::Backend(e.to_string()))?
            .last()
            .map(|(_, record)| record.clone()))
    }

    async fn current_frame(&self) -> Result<Option<FrameRef>, SinkError> {
        Ok(*self
            .frame
            .read()
            .map_err(|e| SinkError::Backend(e.to_string()))?)
    }
}
