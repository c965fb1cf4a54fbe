//! Core traits for the remote transport and the persistence sink.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::{ConnectParams, FrameRef, LogRecord};

/// Incremental output of a remote command.
///
/// Ends when the command exits; a non-zero exit surfaces as a final
/// `TransportError::CommandFailed` item.
pub type OutputStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),
    #[error("Connection timeout")]
    ConnectTimeout,
    #[error("Host unreachable: {0}")]
    HostUnreachable(String),
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("Command exited with {status}: {output}")]
    CommandFailed { status: String, output: String },
    #[error("Session closed")]
    Closed,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the device itself could not be reached, as opposed to a
    /// failure on an otherwise working link.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::HostUnreachable(_) | Self::ConnectTimeout)
    }
}

/// A live remote-shell session.
#[async_trait]
pub trait RemoteSession: Send + Sync + 'static {
    /// Start `command` and stream its output as it arrives.
    async fn run(&self, command: &str, pty: bool) -> Result<OutputStream, TransportError>;

    /// Run `command` to completion and collect its output.
    async fn exec(&self, command: &str, pty: bool) -> Result<Bytes, TransportError> {
        use futures::StreamExt;

        let mut stream = self.run(command, pty).await?;
        let mut out = Vec::new();
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(out))
    }

    /// Whether dropping an in-flight command future actually stops the
    /// remote command. When false, a timed-out command is only detached.
    fn interruptible(&self) -> bool {
        false
    }

    /// Tear the session down.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Trait for remote-shell transports.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    type Session: RemoteSession;

    /// Open a session. Implementations should honor
    /// `params.connect_timeout`; callers bound the attempt as well.
    async fn connect(&self, params: &ConnectParams) -> Result<Self::Session, TransportError>;
}

/// Sink error.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink backend error: {0}")]
    Backend(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for the durable store accepted records are written to.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Persist one record, optionally correlated with a telemetry frame.
    async fn insert_log(&self, frame: Option<FrameRef>, record: &LogRecord)
    -> Result<(), SinkError>;

    /// The most recently persisted record, if any.
    async fn get_latest_log(&self) -> Result<Option<LogRecord>, SinkError>;

    /// The frame new records should be correlated with.
    async fn current_frame(&self) -> Result<Option<FrameRef>, SinkError> {
        Ok(None)
    }
}
