//! Per-project reconciliation state machine.
//!
//! ```text
//! Untracked ──bootstrap──▶ Tracked(Clean) ⇄ Tracked(Dirty)
//!                                               │ commit
//!                                               ▼
//!                     Pushing ◀── Clean pull ◀─ Pulling ─▶ Conflict ─▶ Resolving
//!                        │                                                 │
//!                        ▼                                                 │
//!                 Tracked(Clean) ◀──────────────── Pushing ◀───────────────┘
//! ```
//!
//! Any phase may end in `Failed`, which is terminal for the cycle only; the
//! next cycle starts again from what the ledger records.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use mirror_core::{Config, Identity, RepoName};

use crate::error::{io_err, SyncError};
use crate::hosting::HostingBackend;
use crate::ledger::StateLedger;
use crate::resolver::{ConflictRecord, ConflictResolver};
use crate::scan::ProjectDir;
use crate::vcs::{CommitRequest, PullOutcome, VcsBackend, VcsError};

pub const GITIGNORE_PLACEHOLDER: &str = "# Auto-generated .gitignore";
pub const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";

/// Engine settings taken from [`Config`].
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub default_branch: String,
    pub remote: String,
    pub private_repos: bool,
    /// Commit at the folder's modification time instead of now.
    pub backdate_commits: bool,
    /// Used when the repository has no `user.name`/`user.email`.
    pub fallback_identity: Identity,
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_branch: config.default_branch.clone(),
            remote: "origin".to_string(),
            private_repos: config.private_repos,
            backdate_commits: config.backdate_commits,
            fallback_identity: config.identity(),
        }
    }
}

/// What a successful cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The folder was bound to a remote repository. `pushed` is false when
    /// there was nothing to commit.
    Bootstrapped { repo_name: RepoName, pushed: bool },
    /// Tracked and clean; nothing was touched.
    Unchanged,
    /// Local changes were committed, reconciled, and pushed.
    Updated {
        pull: PullOutcome,
        conflicts: Vec<ConflictRecord>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Bootstrapping,
    Committing,
    Pulling,
    Resolving,
    Pushing,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Bootstrapping => "bootstrapping",
            Phase::Committing => "committing",
            Phase::Pulling => "pulling",
            Phase::Resolving => "resolving",
            Phase::Pushing => "pushing",
        })
    }
}

pub struct ReconciliationEngine {
    vcs: Arc<dyn VcsBackend>,
    hosting: Arc<dyn HostingBackend>,
    ledger: Arc<StateLedger>,
    options: EngineOptions,
    project_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ReconciliationEngine {
    pub fn new(
        vcs: Arc<dyn VcsBackend>,
        hosting: Arc<dyn HostingBackend>,
        ledger: Arc<StateLedger>,
        options: EngineOptions,
    ) -> Self {
        Self {
            vcs,
            hosting,
            ledger,
            options,
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<StateLedger> {
        &self.ledger
    }

    /// Run one cycle: bootstrap when untracked, update when tracked.
    ///
    /// A tracked folder whose repository has disappeared is bootstrapped
    /// again. Cycles for the same folder never overlap.
    pub fn reconcile(
        &self,
        project: &ProjectDir,
        message: &str,
    ) -> Result<CycleOutcome, SyncError> {
        let lock = self.project_lock(&project.path);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !project.path.is_dir() {
            return Err(SyncError::ProjectMissing {
                path: project.path.clone(),
            });
        }

        if !self.ledger.is_tracked(&project.path) {
            return self.bootstrap_locked(project);
        }
        if !self.vcs.is_repository(&project.path) {
            tracing::warn!(path = %project.path.display(), "tracked folder is not a repository, re-initializing");
            return self.bootstrap_locked(project);
        }
        self.update_locked(project, message)
    }

    /// Bind an untracked folder to a (new or existing) remote repository.
    pub fn bootstrap(&self, project: &ProjectDir) -> Result<CycleOutcome, SyncError> {
        let lock = self.project_lock(&project.path);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.bootstrap_locked(project)
    }

    /// Commit, pull, and push local changes of a tracked folder.
    pub fn update(&self, project: &ProjectDir, message: &str) -> Result<CycleOutcome, SyncError> {
        let lock = self.project_lock(&project.path);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.update_locked(project, message)
    }

    fn project_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .project_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    // -----------------------------------------------------------------------
    // Bootstrap
    // -----------------------------------------------------------------------

    fn bootstrap_locked(&self, project: &ProjectDir) -> Result<CycleOutcome, SyncError> {
        let path = project.path.as_path();
        enter(path, Phase::Bootstrapping);
        // Read before init and .gitignore touch the folder.
        let when = self.commit_time(path)?;

        let description = format!("Project: {}", project.folder_name);
        let remote = self
            .hosting
            .create_or_get_repository(&project.repo_name, self.options.private_repos, &description)
            .map_err(|source| SyncError::RepoAccess {
                repo: project.repo_name.to_string(),
                source,
            })?;

        self.vcs
            .open_or_init(path, &self.options.default_branch)
            .map_err(|e| SyncError::git("init", path, e))?;
        ensure_gitignore(path)?;
        self.ensure_remote(path, &remote.clone_url)?;

        self.vcs
            .stage_all(path)
            .map_err(|e| SyncError::git("add", path, e))?;
        let pushed = if self.vcs.is_dirty(path).map_err(|e| SyncError::git("status", path, e))? {
            enter(path, Phase::Committing);
            let request = self.commit_request(path, INITIAL_COMMIT_MESSAGE, when)?;
            self.vcs
                .commit(path, &request)
                .map_err(|e| SyncError::git("commit", path, e))?;

            let branch = match self.vcs.current_branch(path) {
                Ok(branch) => branch,
                Err(VcsError::BranchUndetermined) => {
                    let branch = self.options.default_branch.clone();
                    tracing::info!(path = %path.display(), branch = %branch, "branch undetermined, creating it");
                    self.vcs
                        .force_checkout_branch(path, &branch)
                        .map_err(|e| SyncError::git("checkout", path, e))?;
                    branch
                }
                Err(e) => return Err(SyncError::git("rev-parse", path, e)),
            };
            self.push(path, &branch, true)?;
            true
        } else {
            tracing::info!(path = %path.display(), "nothing to commit, binding without push");
            false
        };

        self.ledger.record(
            path,
            project.repo_name.clone(),
            remote.clone_url,
            Utc::now(),
        )?;
        tracing::info!(path = %path.display(), repo = %project.repo_name, pushed, "bootstrap complete");
        Ok(CycleOutcome::Bootstrapped {
            repo_name: project.repo_name.clone(),
            pushed,
        })
    }

    /// Point the remote at `url`: create it, update it, or leave it.
    fn ensure_remote(&self, path: &Path, url: &str) -> Result<(), SyncError> {
        let remote = self.options.remote.as_str();
        let binding = |e: VcsError| SyncError::RemoteBinding {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        match self.vcs.remote_url(path, remote).map_err(binding)? {
            Some(current) if current == url => {
                tracing::debug!(path = %path.display(), remote, "remote already points at the repository");
            }
            Some(_) => {
                self.vcs.set_remote_url(path, remote, url).map_err(binding)?;
                tracing::info!(path = %path.display(), remote, "updated remote URL");
            }
            None => {
                self.vcs.create_remote(path, remote, url).map_err(binding)?;
                tracing::info!(path = %path.display(), remote, "added remote");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    fn update_locked(&self, project: &ProjectDir, message: &str) -> Result<CycleOutcome, SyncError> {
        let path = project.path.as_path();
        if !self.vcs.is_dirty(path).map_err(|e| SyncError::git("status", path, e))? {
            tracing::debug!(path = %path.display(), "clean, nothing to do");
            return Ok(CycleOutcome::Unchanged);
        }

        enter(path, Phase::Committing);
        self.vcs
            .stage_all(path)
            .map_err(|e| SyncError::git("add", path, e))?;
        let when = self.commit_time(path)?;
        let request = self.commit_request(path, message, when)?;
        self.vcs
            .commit(path, &request)
            .map_err(|e| SyncError::git("commit", path, e))?;

        enter(path, Phase::Pulling);
        let (pull, conflicts) = self.pull(path, &request.author)?;

        let branch = self.vcs.current_branch(path).map_err(|e| match e {
            VcsError::BranchUndetermined => SyncError::BranchUndetermined {
                path: path.to_path_buf(),
            },
            e => SyncError::git("rev-parse", path, e),
        })?;
        self.push(path, &branch, false)?;

        self.ledger.mark_synced(path, Utc::now())?;
        tracing::info!(
            path = %path.display(),
            ?pull,
            conflicts = conflicts.len(),
            "update complete"
        );
        Ok(CycleOutcome::Updated { pull, conflicts })
    }

    /// Pull the current branch, recovering from one stale merge and
    /// resolving conflicts.
    fn pull(
        &self,
        path: &Path,
        author: &Identity,
    ) -> Result<(PullOutcome, Vec<ConflictRecord>), SyncError> {
        let remote = self.options.remote.as_str();
        let bound = self
            .vcs
            .remote_url(path, remote)
            .map_err(|e| SyncError::git("remote", path, e))?;
        if bound.is_none() {
            return Err(SyncError::RemoteBinding {
                path: path.to_path_buf(),
                reason: format!("no '{remote}' remote"),
            });
        }
        let branch = self.vcs.current_branch(path).map_err(|e| match e {
            VcsError::BranchUndetermined => SyncError::BranchUndetermined {
                path: path.to_path_buf(),
            },
            e => SyncError::git("rev-parse", path, e),
        })?;

        match self.vcs.pull(path, remote, &branch) {
            Ok(outcome) => Ok((outcome, Vec::new())),
            Err(VcsError::MergeInProgress) => {
                tracing::warn!(path = %path.display(), "unfinished merge found, aborting it and retrying pull once");
                self.vcs
                    .abort_merge(path)
                    .map_err(|e| SyncError::git("merge --abort", path, e))?;
                match self.vcs.pull(path, remote, &branch) {
                    Ok(outcome) => Ok((outcome, Vec::new())),
                    Err(VcsError::MergeInProgress) => Err(SyncError::StuckMerge {
                        path: path.to_path_buf(),
                    }),
                    Err(e) => self.pull_failed(path, e, author),
                }
            }
            Err(e) => self.pull_failed(path, e, author),
        }
    }

    fn pull_failed(
        &self,
        path: &Path,
        error: VcsError,
        author: &Identity,
    ) -> Result<(PullOutcome, Vec<ConflictRecord>), SyncError> {
        match error {
            VcsError::MergeConflict { paths } => {
                enter(path, Phase::Resolving);
                let records = ConflictResolver::new(self.vcs.as_ref())
                    .resolve(path, &paths, author, Utc::now())
                    .map_err(|source| SyncError::Resolution {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Ok((PullOutcome::Merged, records))
            }
            VcsError::RemoteMissing { name } => Err(SyncError::RemoteBinding {
                path: path.to_path_buf(),
                reason: format!("no '{name}' remote"),
            }),
            VcsError::BranchUndetermined => Err(SyncError::BranchUndetermined {
                path: path.to_path_buf(),
            }),
            e => Err(SyncError::git("pull", path, e)),
        }
    }

    // -----------------------------------------------------------------------
    // Shared steps
    // -----------------------------------------------------------------------

    fn push(&self, path: &Path, branch: &str, set_upstream: bool) -> Result<(), SyncError> {
        enter(path, Phase::Pushing);
        let refspec = format!("refs/heads/{branch}:refs/heads/{branch}");
        let updates = self
            .vcs
            .push(path, &self.options.remote, &refspec, set_upstream)
            .map_err(|e| match e {
                VcsError::RemoteMissing { name } => SyncError::RemoteBinding {
                    path: path.to_path_buf(),
                    reason: format!("no '{name}' remote"),
                },
                e => SyncError::git("push", path, e),
            })?;
        let rejected: Vec<String> = updates
            .iter()
            .filter_map(|u| u.error.as_ref().map(|err| format!("{}: {err}", u.refname)))
            .collect();
        if !rejected.is_empty() {
            return Err(SyncError::PushRejected {
                path: path.to_path_buf(),
                rejected,
            });
        }
        Ok(())
    }

    fn commit_request(
        &self,
        path: &Path,
        message: &str,
        when: DateTime<Utc>,
    ) -> Result<CommitRequest, SyncError> {
        let author = self
            .vcs
            .configured_identity(path)
            .map_err(|e| SyncError::git("config", path, e))?
            .unwrap_or_else(|| self.options.fallback_identity.clone());
        Ok(CommitRequest::at(message, author, when))
    }

    fn commit_time(&self, path: &Path) -> Result<DateTime<Utc>, SyncError> {
        if self.options.backdate_commits {
            folder_mtime(path)
        } else {
            Ok(Utc::now())
        }
    }
}

fn enter(path: &Path, phase: Phase) {
    tracing::debug!(path = %path.display(), %phase, "entering phase");
}

/// Create a placeholder `.gitignore` unless one exists.
pub fn ensure_gitignore(project: &Path) -> Result<bool, SyncError> {
    let path = project.join(".gitignore");
    if path.exists() {
        return Ok(false);
    }
    std::fs::write(&path, GITIGNORE_PLACEHOLDER).map_err(|e| io_err(&path, e))?;
    Ok(true)
}

fn folder_mtime(path: &Path) -> Result<DateTime<Utc>, SyncError> {
    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| io_err(path, e))?;
    Ok(DateTime::<Utc>::from(modified))
}
