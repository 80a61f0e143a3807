//! Guarded filesystem rename.
//!
//! State machine: Idle → CollisionCheck → {AwaitingConfirmation → Proceed |
//! Abort} → Done/Failed. The target directory is always the source's
//! directory; an existing target pauses for explicit confirmation, and
//! declining leaves both files untouched.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::error::RenameError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub source: PathBuf,
    pub target: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenameOutcome {
    /// The move completed; subsequent lookups use the new path.
    Renamed { new_path: PathBuf },
    /// The target exists; the host must ask the user before overwriting.
    NeedsConfirmation { target: PathBuf },
    /// The user declined the overwrite; nothing changed.
    Aborted,
}

#[derive(Debug, Default)]
enum State {
    #[default]
    Idle,
    AwaitingConfirmation(RenameRequest),
}

#[derive(Debug, Default)]
pub struct RenameExecutor {
    state: State,
}

impl RenameExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a rename of `source` to `candidate_filename` in the same
    /// directory. Completes immediately when there is no collision;
    /// otherwise parks in `AwaitingConfirmation` until [`Self::confirm`].
    pub fn begin(
        &mut self,
        source: &Path,
        candidate_filename: &str,
    ) -> Result<RenameOutcome, RenameError> {
        let filename = Path::new(candidate_filename);
        let is_bare_filename = filename.components().count() == 1
            && matches!(filename.components().next(), Some(Component::Normal(_)));
        if candidate_filename.trim().is_empty() || !is_bare_filename {
            return Err(RenameError::InvalidTarget(candidate_filename.to_string()));
        }

        let dir = source.parent().ok_or_else(|| RenameError::Io {
            source_path: source.to_path_buf(),
            reason: "Source has no parent directory".to_string(),
        })?;
        let target = dir.join(candidate_filename);

        if target == source {
            // Renaming onto itself is a no-op, not a collision.
            self.state = State::Idle;
            return Ok(RenameOutcome::Renamed {
                new_path: target,
            });
        }

        let request = RenameRequest {
            source: source.to_path_buf(),
            target: target.clone(),
        };

        if target.exists() {
            tracing::info!(
                "[Rename] Collision on {}, awaiting confirmation",
                target.display()
            );
            self.state = State::AwaitingConfirmation(request);
            return Ok(RenameOutcome::NeedsConfirmation { target });
        }

        self.state = State::Idle;
        perform(&request)
    }

    /// Resolve a pending collision. `accept` overwrites the target;
    /// declining aborts with no side effects.
    pub fn confirm(&mut self, accept: bool) -> Result<RenameOutcome, RenameError> {
        let state = std::mem::take(&mut self.state);
        let State::AwaitingConfirmation(request) = state else {
            return Err(RenameError::NothingPending);
        };

        if !accept {
            tracing::info!("[Rename] Overwrite declined for {}", request.target.display());
            return Ok(RenameOutcome::Aborted);
        }

        perform(&request)
    }

    pub fn pending(&self) -> Option<&RenameRequest> {
        match &self.state {
            State::AwaitingConfirmation(request) => Some(request),
            State::Idle => None,
        }
    }
}

/// The move itself: one filesystem operation. On failure the source file
/// is untouched and the underlying reason is surfaced.
fn perform(request: &RenameRequest) -> Result<RenameOutcome, RenameError> {
    std::fs::rename(&request.source, &request.target).map_err(|e| RenameError::Io {
        source_path: request.source.clone(),
        reason: e.to_string(),
    })?;

    tracing::info!(
        "[Rename] {} -> {}",
        request.source.display(),
        request.target.display()
    );

    Ok(RenameOutcome::Renamed {
        new_path: request.target.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_rename_without_collision() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("old.txt");
        fs::write(&source, "content").unwrap();

        let mut executor = RenameExecutor::new();
        let outcome = executor.begin(&source, "new.txt").unwrap();

        let expected = dir.path().join("new.txt");
        assert_eq!(
            outcome,
            RenameOutcome::Renamed {
                new_path: expected.clone()
            }
        );
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(expected).unwrap(), "content");
    }

    #[test]
    fn test_collision_pauses_and_decline_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("old.txt");
        let existing = dir.path().join("taken.txt");
        fs::write(&source, "source content").unwrap();
        fs::write(&existing, "existing content").unwrap();

        let mut executor = RenameExecutor::new();
        let outcome = executor.begin(&source, "taken.txt").unwrap();
        assert!(matches!(outcome, RenameOutcome::NeedsConfirmation { .. }));
        assert!(executor.pending().is_some());

        let outcome = executor.confirm(false).unwrap();
        assert_eq!(outcome, RenameOutcome::Aborted);
        assert_eq!(fs::read_to_string(&source).unwrap(), "source content");
        assert_eq!(fs::read_to_string(&existing).unwrap(), "existing content");
        assert!(executor.pending().is_none());
    }

    #[test]
    fn test_collision_accept_overwrites() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("old.txt");
        let existing = dir.path().join("taken.txt");
        fs::write(&source, "source content").unwrap();
        fs::write(&existing, "existing content").unwrap();

        let mut executor = RenameExecutor::new();
        executor.begin(&source, "taken.txt").unwrap();
        let outcome = executor.confirm(true).unwrap();

        assert_eq!(
            outcome,
            RenameOutcome::Renamed {
                new_path: existing.clone()
            }
        );
        assert!(!source.exists());
        assert_eq!(fs::read_to_string(&existing).unwrap(), "source content");
    }

    #[test]
    fn test_confirm_without_pending_rename_fails() {
        let mut executor = RenameExecutor::new();
        assert!(matches!(
            executor.confirm(true),
            Err(RenameError::NothingPending)
        ));
    }

    #[test]
    fn test_missing_source_is_io_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("ghost.txt");

        let mut executor = RenameExecutor::new();
        let err = executor.begin(&source, "new.txt").unwrap_err();
        assert!(matches!(err, RenameError::Io { .. }));
    }

    #[test]
    fn test_path_traversal_in_candidate_rejected() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("old.txt");
        fs::write(&source, "x").unwrap();

        let mut executor = RenameExecutor::new();
        assert!(matches!(
            executor.begin(&source, "../escape.txt"),
            Err(RenameError::InvalidTarget(_))
        ));
        assert!(matches!(
            executor.begin(&source, ""),
            Err(RenameError::InvalidTarget(_))
        ));
    }
}
