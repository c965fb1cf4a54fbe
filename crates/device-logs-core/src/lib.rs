//! Core abstractions for resilient remote device log streaming.
//!
//! This crate provides the fundamental building blocks:
//! - `LogRecord` / `LogLevel` - Structured log records
//! - `TailConfig` / `ConnectParams` - Tailer and transport configuration
//! - `ConnectionState` - Lifecycle of the managed remote session
//! - Transport and sink traits

pub mod config;
pub mod record;
pub mod state;
pub mod traits;

pub use config::{ConfigError, ConnectParams, Credential, TailConfig, TailTarget};
pub use record::{FrameRef, LogLevel, LogRecord};
pub use state::ConnectionState;
pub use traits::{LogSink, OutputStream, RemoteSession, SinkError, Transport, TransportError};
