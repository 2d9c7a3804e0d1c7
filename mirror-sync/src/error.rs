//! Error types for mirror-sync.

use std::path::PathBuf;

use thiserror::Error;

use mirror_core::StateError;

use crate::hosting::HostingError;
use crate::vcs::VcsError;

/// Why one reconciliation cycle for one project failed.
///
/// Everything except [`SyncError::State`] is contained to the project; see
/// [`SyncError::is_fatal`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// Hosting API failure other than "name already in use".
    #[error("repository access failed for '{repo}': {source}")]
    RepoAccess {
        repo: String,
        #[source]
        source: HostingError,
    },

    /// The `origin` remote is missing or cannot be configured.
    #[error("remote binding failed for {path}: {reason}")]
    RemoteBinding { path: PathBuf, reason: String },

    #[error("current branch of {path} cannot be determined")]
    BranchUndetermined { path: PathBuf },

    /// Generic version-control failure, tagged with the operation.
    #[error("git {op} failed in {path}: {source}")]
    Git {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: VcsError,
    },

    /// The resolution commit for a conflicted merge could not be made.
    #[error("conflict resolution failed in {path}: {source}")]
    Resolution {
        path: PathBuf,
        #[source]
        source: VcsError,
    },

    /// An unfinished merge survived abort plus one pull retry.
    #[error("unfinished merge in {path} persisted after abort and retry")]
    StuckMerge { path: PathBuf },

    /// At least one ref update was rejected by the remote.
    #[error("push rejected for {path}: {}", rejected.join("; "))]
    PushRejected { path: PathBuf, rejected: Vec<String> },

    #[error("project directory {path} no longer exists")]
    ProjectMissing { path: PathBuf },

    #[error("folder name '{folder}' yields an empty repository name")]
    InvalidRepoName { folder: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state document error: {0}")]
    State(#[from] StateError),
}

impl SyncError {
    /// Failures that must stop the whole run rather than one project.
    ///
    /// A state document that cannot be read or written would make the next
    /// cycle re-bootstrap projects that are already tracked.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::State(_))
    }

    pub(crate) fn git(op: &'static str, path: impl Into<PathBuf>, source: VcsError) -> Self {
        SyncError::Git {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_state_errors_are_fatal() {
        assert!(SyncError::State(StateError::HomeNotFound).is_fatal());
        assert!(!SyncError::StuckMerge {
            path: PathBuf::from("/p")
        }
        .is_fatal());
        assert!(!SyncError::git("push", "/p", VcsError::MergeInProgress).is_fatal());
    }

    #[test]
    fn push_rejection_lists_every_ref() {
        let err = SyncError::PushRejected {
            path: PathBuf::from("/p"),
            rejected: vec!["refs/heads/main: non-fast-forward".into()],
        };
        assert!(err.to_string().contains("refs/heads/main: non-fast-forward"));
    }
}
