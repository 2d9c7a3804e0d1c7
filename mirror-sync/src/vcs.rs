//! Version-control capability seam.
//!
//! The engine depends on these capability-shaped operations rather than on
//! git helper functions, so cycles can be driven against a scripted backend
//! in tests. Every operation takes the working-tree root; implementations
//! open the repository per call.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use mirror_core::Identity;

/// Failure kinds reported by a [`VcsBackend`]. Callers branch on the kind,
/// never on message text.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("not a repository: {path}")]
    NotARepository { path: PathBuf },

    #[error("remote '{name}' is not configured")]
    RemoteMissing { name: String },

    #[error("current branch cannot be determined (no commit yet or detached HEAD)")]
    BranchUndetermined,

    #[error("merge stopped with {} conflicted path(s)", paths.len())]
    MergeConflict { paths: Vec<PathBuf> },

    #[error("an unfinished merge is in progress")]
    MergeInProgress,

    #[error("authentication rejected during {op}: {message}")]
    Auth { op: &'static str, message: String },

    #[error("{op} failed: {message}")]
    Backend { op: &'static str, message: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a commit should contain beyond the staged index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitKind {
    /// Single parent (HEAD, if any). Leaves any merge state untouched.
    Normal,
    /// Parents are HEAD plus every pending merge head; clears merge state.
    ConcludeMerge,
}

/// A commit with explicit identity and timestamps.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub message: String,
    pub author: Identity,
    pub authored_at: DateTime<Utc>,
    pub committed_at: DateTime<Utc>,
    pub kind: CommitKind,
}

impl CommitRequest {
    /// Normal commit with the same author/commit timestamp.
    pub fn at(message: impl Into<String>, author: Identity, when: DateTime<Utc>) -> Self {
        Self {
            message: message.into(),
            author,
            authored_at: when,
            committed_at: when,
            kind: CommitKind::Normal,
        }
    }

    pub fn concluding_merge(mut self) -> Self {
        self.kind = CommitKind::ConcludeMerge;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    UpToDate,
    FastForward,
    Merged,
    /// The remote has no such branch yet (freshly created repository).
    RemoteBranchMissing,
}

/// Which side of a conflicted index entry to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictSide {
    /// The pre-merge local version.
    Ours,
    /// The incoming remote version.
    Theirs,
}

/// One reference update reported by the remote during push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefUpdate {
    pub refname: String,
    /// `Some(reason)` when the remote rejected this ref.
    pub error: Option<String>,
}

/// Version-control primitives needed by the reconciliation engine.
pub trait VcsBackend: Send + Sync {
    fn is_repository(&self, repo: &Path) -> bool;

    /// Open the repository at `repo`, initializing one when absent.
    /// Returns `true` when a new repository was created.
    fn open_or_init(&self, repo: &Path, initial_branch: &str) -> Result<bool, VcsError>;

    /// Stage every addition, modification, and deletion (respecting ignores).
    fn stage_all(&self, repo: &Path) -> Result<(), VcsError>;

    /// Stage one path (relative to the working tree); removes it from the
    /// index when it no longer exists on disk.
    fn stage_path(&self, repo: &Path, file: &Path) -> Result<(), VcsError>;

    /// Modified, staged, or untracked (non-ignored) content exists.
    fn is_dirty(&self, repo: &Path) -> Result<bool, VcsError>;

    fn commit(&self, repo: &Path, request: &CommitRequest) -> Result<String, VcsError>;

    /// Identity from the repository's VCS configuration, if fully set.
    fn configured_identity(&self, repo: &Path) -> Result<Option<Identity>, VcsError>;

    fn remote_url(&self, repo: &Path, remote: &str) -> Result<Option<String>, VcsError>;

    fn create_remote(&self, repo: &Path, remote: &str, url: &str) -> Result<(), VcsError>;

    fn set_remote_url(&self, repo: &Path, remote: &str, url: &str) -> Result<(), VcsError>;

    /// Short name of the checked-out branch; [`VcsError::BranchUndetermined`]
    /// when HEAD is unborn or detached.
    fn current_branch(&self, repo: &Path) -> Result<String, VcsError>;

    /// Create (or reset) `branch` at HEAD and check it out.
    fn force_checkout_branch(&self, repo: &Path, branch: &str) -> Result<(), VcsError>;

    /// Fetch `branch` from `remote` and merge it (never rebase).
    ///
    /// Fails with [`VcsError::MergeInProgress`] when a previous merge was left
    /// unfinished and with [`VcsError::MergeConflict`] when the merge stops on
    /// conflicts (the merge state is left in place for resolution).
    fn pull(&self, repo: &Path, remote: &str, branch: &str) -> Result<PullOutcome, VcsError>;

    fn merge_in_progress(&self, repo: &Path) -> Result<bool, VcsError>;

    /// Drop merge state and conflict entries. Working-tree files are kept.
    fn abort_merge(&self, repo: &Path) -> Result<(), VcsError>;

    /// Push `refspec`; when `set_upstream` is set, record the remote branch as
    /// upstream of the local one after a clean push.
    fn push(
        &self,
        repo: &Path,
        remote: &str,
        refspec: &str,
        set_upstream: bool,
    ) -> Result<Vec<RefUpdate>, VcsError>;

    /// Paths (relative to the working tree) with unresolved conflicts.
    fn unmerged_paths(&self, repo: &Path) -> Result<Vec<PathBuf>, VcsError>;

    /// Content of one side of a conflicted path; `None` when that side
    /// deleted the file.
    fn read_conflict_side(
        &self,
        repo: &Path,
        file: &Path,
        side: ConflictSide,
    ) -> Result<Option<Vec<u8>>, VcsError>;

    /// Resolve `file` with the incoming version: written to the working tree
    /// (or removed, if the remote deleted it) and staged.
    fn checkout_theirs(&self, repo: &Path, file: &Path) -> Result<(), VcsError>;
}
