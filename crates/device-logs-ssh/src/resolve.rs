//! Executable resolution.

use std::path::{Path, PathBuf};

/// Resolve an executable by name.
///
/// Explicit absolute paths are used as-is when they exist; anything else
/// is looked up on `PATH`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    which_async(executable).await
}

async fn which_async(executable: &str) -> Option<PathBuf> {
    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_name_resolves_to_nothing() {
        assert_eq!(resolve_executable_path("  ").await, None);
    }

    #[tokio::test]
    async fn test_missing_absolute_path() {
        assert_eq!(
            resolve_executable_path("/definitely/not/here/ssh").await,
            None
        );
    }

    #[tokio::test]
    async fn test_unknown_program() {
        assert_eq!(
            resolve_executable_path("no-such-program-device-logs").await,
            None
        );
    }
}
