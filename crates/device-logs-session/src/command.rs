//! Remote command construction.

use device_logs_core::TailTarget;
use thiserror::Error;

/// Lines replayed when a follow command (re)starts.
pub const DEFAULT_BACKLOG: usize = 100;

/// Cheap command used only to test liveness.
pub const PROBE_COMMAND: &str = "echo heartbeat";

/// Command build error.
#[derive(Debug, Error)]
pub enum CommandBuildError {
    #[error("Failed to quote argument: {0}")]
    Quote(#[from] shlex::QuoteError),
}

/// Build the shell command that follows `target`.
///
/// Both variants replay a bounded backlog so lines written while the link
/// was down are picked up again; ordering filters out what was already
/// persisted.
///
/// # Errors
/// Returns error if the target cannot be shell-quoted.
pub fn follow_command(target: &TailTarget) -> Result<String, CommandBuildError> {
    let command = match target {
        TailTarget::File(path) => {
            format!("tail -n {DEFAULT_BACKLOG} -F {}", shlex::try_quote(path)?)
        }
        TailTarget::Container(id) => format!(
            "docker logs --timestamps --tail {DEFAULT_BACKLOG} -f {}",
            shlex::try_quote(id)?
        ),
    };
    Ok(command)
}
