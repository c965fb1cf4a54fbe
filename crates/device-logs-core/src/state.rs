//! Connection lifecycle state.

use serde::{Deserialize, Serialize};

/// Lifecycle of the managed remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No live session.
    #[default]
    Disconnected,
    /// First attempt sequence in progress.
    Connecting,
    /// Session is live but nothing is streaming over it.
    Connected,
    /// A follow command is streaming over the live session.
    Tailing,
    /// A failed session is being replaced.
    Reconnecting,
    /// Terminal; reached only through an explicit stop.
    Stopped,
}

impl ConnectionState {
    /// Whether a live session handle exists in this state.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Connected | Self::Tailing)
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }
}
