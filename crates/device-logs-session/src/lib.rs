//! Connection supervision, tailing and storage for remote device logs.
//!
//! Provides:
//! - `ConnectionManager` - Bounded, backed-off session establishment
//! - `TailSession` - Follow command → reassembly → parsing → ordering → sink
//! - `HeartbeatMonitor` - Liveness probing and recovery
//! - `Tailer` - Supervisor tying the above together
//! - Sink implementations (memory, SQLite)

pub mod command;
pub mod connection;
pub mod heartbeat;
pub mod pipeline;
pub mod signals;
pub mod storage;
pub mod tail;
pub mod tailer;

#[cfg(test)]
pub(crate) mod mock;

pub use connection::{ConnectError, ConnectionManager, RetryPolicy, SessionHandle};
pub use heartbeat::HeartbeatMonitor;
pub use pipeline::{LineOutcome, OrderGuard, RecordPipeline};
pub use signals::Signals;
pub use tail::{TailError, TailSession, TailState};
pub use tailer::{Tailer, TailerError};
