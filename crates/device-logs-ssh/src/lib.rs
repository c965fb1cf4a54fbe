//! OpenSSH control-master transport for device log streaming.
//!
//! Provides:
//! - `SshTransport` - Opens a multiplexed session per connect
//! - `SshSession` - Runs follow and probe commands over that session
//! - Executable resolution for `ssh` / `sshpass`

pub mod resolve;
pub mod transport;

pub use resolve::resolve_executable_path;
pub use transport::{SshOptions, SshSession, SshTransport};
