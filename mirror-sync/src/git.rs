//! [`VcsBackend`] over libgit2.
//!
//! Each call opens the repository afresh; nothing is cached between calls,
//! so a project's working tree can be touched by other tools between cycles.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::build::CheckoutBuilder;
use git2::{
    Cred, ErrorClass, ErrorCode, FetchOptions, Index, IndexAddOption, IndexEntry, PushOptions,
    RemoteCallbacks, Repository, RepositoryInitOptions, RepositoryState, ResetType, Signature,
    StatusOptions,
};

use mirror_core::{redact_credentials, ApiToken, Identity};

use crate::vcs::{
    CommitKind, CommitRequest, ConflictSide, PullOutcome, RefUpdate, VcsBackend, VcsError,
};

/// Credential callbacks give up after this many prompts for one operation.
const MAX_CREDENTIAL_ATTEMPTS: u32 = 3;

/// Password sent alongside a token used as the basic-auth user name.
const TOKEN_PASSWORD: &str = "x-oauth-basic";

pub struct Git2Backend {
    token: Option<ApiToken>,
    /// Signature for merge commits made during pull when the repository has
    /// no identity configured.
    fallback_identity: Identity,
}

impl Git2Backend {
    pub fn new(token: Option<ApiToken>, fallback_identity: Identity) -> Self {
        Self {
            token,
            fallback_identity,
        }
    }

    fn callbacks<'a>(&self, repo: &Repository) -> RemoteCallbacks<'a> {
        credential_callbacks(self.token.clone(), repo.config().ok())
    }

    fn merge_signature(&self, repo: &Repository) -> Result<Signature<'static>, VcsError> {
        match repo.signature() {
            Ok(sig) => Ok(sig.to_owned()),
            Err(_) => Signature::now(&self.fallback_identity.name, &self.fallback_identity.email)
                .map_err(classify("signature")),
        }
    }
}

impl VcsBackend for Git2Backend {
    fn is_repository(&self, repo: &Path) -> bool {
        Repository::open(repo).is_ok()
    }

    fn open_or_init(&self, repo: &Path, initial_branch: &str) -> Result<bool, VcsError> {
        if Repository::open(repo).is_ok() {
            return Ok(false);
        }
        let mut opts = RepositoryInitOptions::new();
        opts.initial_head(initial_branch);
        Repository::init_opts(repo, &opts).map_err(classify("init"))?;
        tracing::info!(path = %repo.display(), branch = initial_branch, "initialized repository");
        Ok(true)
    }

    fn stage_all(&self, repo: &Path) -> Result<(), VcsError> {
        let repo = open(repo)?;
        let mut index = repo.index().map_err(classify("add"))?;
        index
            .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
            .map_err(classify("add"))?;
        index
            .update_all(["*"].iter(), None)
            .map_err(classify("add"))?;
        index.write().map_err(classify("add"))
    }

    fn stage_path(&self, repo: &Path, file: &Path) -> Result<(), VcsError> {
        let git = open(repo)?;
        let mut index = git.index().map_err(classify("add"))?;
        if repo.join(file).exists() {
            index.add_path(file).map_err(classify("add"))?;
        } else {
            index.remove_path(file).map_err(classify("rm"))?;
        }
        index.write().map_err(classify("add"))
    }

    fn is_dirty(&self, repo: &Path) -> Result<bool, VcsError> {
        let repo = open(repo)?;
        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts)).map_err(classify("status"))?;
        Ok(!statuses.is_empty())
    }

    fn commit(&self, repo: &Path, request: &CommitRequest) -> Result<String, VcsError> {
        let mut repo = open(repo)?;
        let merge_ids = match request.kind {
            CommitKind::ConcludeMerge => merge_heads(&mut repo)?,
            CommitKind::Normal => Vec::new(),
        };
        let mut index = repo.index().map_err(classify("commit"))?;
        let tree_id = index.write_tree().map_err(classify("commit"))?;
        let tree = repo.find_tree(tree_id).map_err(classify("commit"))?;

        let author = signature(&request.author, request.authored_at)?;
        let committer = signature(&request.author, request.committed_at)?;

        let mut parents = Vec::new();
        if let Ok(head) = repo.head() {
            parents.push(head.peel_to_commit().map_err(classify("commit"))?);
        }
        for id in merge_ids {
            parents.push(repo.find_commit(id).map_err(classify("commit"))?);
        }
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();

        let oid = repo
            .commit(
                Some("HEAD"),
                &author,
                &committer,
                &request.message,
                &tree,
                &parent_refs,
            )
            .map_err(classify("commit"))?;
        if request.kind == CommitKind::ConcludeMerge {
            repo.cleanup_state().map_err(classify("commit"))?;
        }
        tracing::debug!(commit = %oid, parents = parent_refs.len(), "created commit");
        Ok(oid.to_string())
    }

    fn configured_identity(&self, repo: &Path) -> Result<Option<Identity>, VcsError> {
        let repo = open(repo)?;
        let config = repo.config().map_err(classify("config"))?;
        let name = config.get_string("user.name").ok();
        let email = config.get_string("user.email").ok();
        Ok(match (name, email) {
            (Some(name), Some(email)) if !name.is_empty() && !email.is_empty() => {
                Some(Identity { name, email })
            }
            _ => None,
        })
    }

    fn remote_url(&self, repo: &Path, remote: &str) -> Result<Option<String>, VcsError> {
        let repo = open(repo)?;
        let url = match repo.find_remote(remote) {
            Ok(r) => Ok(r.url().map(str::to_string)),
            Err(e) if is_not_found(&e) => Ok(None),
            Err(e) => Err(classify("remote")(e)),
        };
        url
    }

    fn create_remote(&self, repo: &Path, remote: &str, url: &str) -> Result<(), VcsError> {
        let repo = open(repo)?;
        repo.remote(remote, url).map_err(classify("remote add"))?;
        Ok(())
    }

    fn set_remote_url(&self, repo: &Path, remote: &str, url: &str) -> Result<(), VcsError> {
        let repo = open(repo)?;
        repo.remote_set_url(remote, url)
            .map_err(classify("remote set-url"))
    }

    fn current_branch(&self, repo: &Path) -> Result<String, VcsError> {
        let repo = open(repo)?;
        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                return Err(VcsError::BranchUndetermined)
            }
            Err(e) => return Err(classify("rev-parse")(e)),
        };
        if !head.is_branch() {
            return Err(VcsError::BranchUndetermined);
        }
        head.shorthand()
            .map(str::to_string)
            .ok_or(VcsError::BranchUndetermined)
    }

    fn force_checkout_branch(&self, repo: &Path, branch: &str) -> Result<(), VcsError> {
        let repo = open(repo)?;
        let refname = format!("refs/heads/{branch}");
        let result = match repo.head().and_then(|h| h.peel_to_commit()) {
            Ok(commit) => {
                repo.branch(branch, &commit, true)
                    .map_err(classify("checkout -B"))?;
                repo.set_head(&refname).map_err(classify("checkout -B"))?;
                repo.checkout_head(Some(CheckoutBuilder::new().safe()))
                    .map_err(classify("checkout -B"))
            }
            // No commit yet: point the unborn HEAD at the branch.
            Err(_) => repo.set_head(&refname).map_err(classify("checkout -B")),
        };
        result
    }

    fn pull(&self, repo: &Path, remote: &str, branch: &str) -> Result<PullOutcome, VcsError> {
        let git = open(repo)?;
        if has_unfinished_merge(&git)? {
            return Err(VcsError::MergeInProgress);
        }

        let mut origin = find_remote(&git, remote)?;
        let refspec = format!("+refs/heads/{branch}:refs/remotes/{remote}/{branch}");
        let mut fetch_opts = FetchOptions::new();
        fetch_opts.remote_callbacks(self.callbacks(&git));
        origin
            .fetch(&[refspec.as_str()], Some(&mut fetch_opts), None)
            .map_err(classify("fetch"))?;

        let tracking = format!("refs/remotes/{remote}/{branch}");
        let fetched = match git.find_reference(&tracking) {
            Ok(r) => r,
            Err(e) if is_not_found(&e) => return Ok(PullOutcome::RemoteBranchMissing),
            Err(e) => return Err(classify("fetch")(e)),
        };
        let incoming = git
            .reference_to_annotated_commit(&fetched)
            .map_err(classify("merge"))?;
        let (analysis, _) = git
            .merge_analysis(&[&incoming])
            .map_err(classify("merge"))?;

        let local_ref = format!("refs/heads/{branch}");
        if analysis.is_up_to_date() {
            return Ok(PullOutcome::UpToDate);
        }
        if analysis.is_unborn() {
            git.reference(&local_ref, incoming.id(), true, "pull: initial")
                .map_err(classify("merge"))?;
            git.set_head(&local_ref).map_err(classify("merge"))?;
            git.checkout_head(Some(CheckoutBuilder::default().force()))
                .map_err(classify("checkout"))?;
            return Ok(PullOutcome::FastForward);
        }
        if analysis.is_fast_forward() {
            let mut target = git.find_reference(&local_ref).map_err(classify("merge"))?;
            target
                .set_target(incoming.id(), "pull: fast-forward")
                .map_err(classify("merge"))?;
            git.set_head(&local_ref).map_err(classify("merge"))?;
            git.checkout_head(Some(CheckoutBuilder::default().force()))
                .map_err(classify("checkout"))?;
            return Ok(PullOutcome::FastForward);
        }

        git.merge(&[&incoming], None, None)
            .map_err(classify("merge"))?;
        let mut index = git.index().map_err(classify("merge"))?;
        if index.has_conflicts() {
            let paths = conflicted_paths(&index)?;
            tracing::info!(path = %repo.display(), conflicts = paths.len(), "merge stopped on conflicts");
            return Err(VcsError::MergeConflict { paths });
        }

        let tree_id = index.write_tree().map_err(classify("merge"))?;
        let tree = git.find_tree(tree_id).map_err(classify("merge"))?;
        let ours = git
            .head()
            .and_then(|h| h.peel_to_commit())
            .map_err(classify("merge"))?;
        let theirs = git.find_commit(incoming.id()).map_err(classify("merge"))?;
        let sig = self.merge_signature(&git)?;
        git.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &format!("Merge branch '{branch}' of {remote}"),
            &tree,
            &[&ours, &theirs],
        )
        .map_err(classify("merge"))?;
        git.cleanup_state().map_err(classify("merge"))?;
        Ok(PullOutcome::Merged)
    }

    fn merge_in_progress(&self, repo: &Path) -> Result<bool, VcsError> {
        let repo = open(repo)?;
        has_unfinished_merge(&repo)
    }

    fn abort_merge(&self, repo: &Path) -> Result<(), VcsError> {
        let repo = open(repo)?;
        let head = repo.head().and_then(|h| h.peel(git2::ObjectType::Commit));
        match head {
            Ok(head) => repo
                .reset(&head, ResetType::Mixed, None)
                .map_err(classify("merge --abort"))?,
            // Unborn HEAD: nothing to reset to, so drop every index entry.
            Err(_) => {
                let mut index = repo.index().map_err(classify("merge --abort"))?;
                index.clear().map_err(classify("merge --abort"))?;
                index.write().map_err(classify("merge --abort"))?;
            }
        }
        repo.cleanup_state().map_err(classify("merge --abort"))
    }

    fn push(
        &self,
        repo: &Path,
        remote: &str,
        refspec: &str,
        set_upstream: bool,
    ) -> Result<Vec<RefUpdate>, VcsError> {
        let git = open(repo)?;
        let mut origin = find_remote(&git, remote)?;

        let updates: RefCell<Vec<RefUpdate>> = RefCell::new(Vec::new());
        {
            let mut callbacks = self.callbacks(&git);
            callbacks.push_update_reference(|refname, status| {
                updates.borrow_mut().push(RefUpdate {
                    refname: refname.to_string(),
                    error: status.map(str::to_string),
                });
                Ok(())
            });
            let mut push_opts = PushOptions::new();
            push_opts.remote_callbacks(callbacks);
            origin
                .push(&[refspec], Some(&mut push_opts))
                .map_err(classify("push"))?;
        }
        let updates = updates.into_inner();

        if set_upstream && updates.iter().all(|u| u.error.is_none()) {
            if let Some((src, dst)) = refspec.trim_start_matches('+').split_once(':') {
                if let Some(local) = src.strip_prefix("refs/heads/") {
                    let mut config = git.config().map_err(classify("push"))?;
                    config
                        .set_str(&format!("branch.{local}.remote"), remote)
                        .map_err(classify("push"))?;
                    config
                        .set_str(&format!("branch.{local}.merge"), dst)
                        .map_err(classify("push"))?;
                }
            }
        }
        Ok(updates)
    }

    fn unmerged_paths(&self, repo: &Path) -> Result<Vec<PathBuf>, VcsError> {
        let repo = open(repo)?;
        let index = repo.index().map_err(classify("ls-files"))?;
        conflicted_paths(&index)
    }

    fn read_conflict_side(
        &self,
        repo: &Path,
        file: &Path,
        side: ConflictSide,
    ) -> Result<Option<Vec<u8>>, VcsError> {
        let repo = open(repo)?;
        let index = repo.index().map_err(classify("show"))?;
        let entry = conflict_entry(&index, file, side)?;
        match entry {
            Some(entry) => {
                let blob = repo.find_blob(entry.id).map_err(classify("show"))?;
                Ok(Some(blob.content().to_vec()))
            }
            None => Ok(None),
        }
    }

    fn checkout_theirs(&self, repo: &Path, file: &Path) -> Result<(), VcsError> {
        let git = open(repo)?;
        let mut index = git.index().map_err(classify("checkout --theirs"))?;
        let target = repo.join(file);
        match conflict_entry(&index, file, ConflictSide::Theirs)? {
            Some(entry) => {
                let blob = git.find_blob(entry.id).map_err(classify("checkout --theirs"))?;
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
                }
                std::fs::write(&target, blob.content()).map_err(|e| io_err(&target, e))?;
                index.add_path(file).map_err(classify("checkout --theirs"))?;
            }
            None => {
                if target.exists() {
                    std::fs::remove_file(&target).map_err(|e| io_err(&target, e))?;
                }
                index.remove_path(file).map_err(classify("rm"))?;
            }
        }
        index.write().map_err(classify("checkout --theirs"))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open(path: &Path) -> Result<Repository, VcsError> {
    Repository::open(path).map_err(|e| match e.code() {
        ErrorCode::NotFound => VcsError::NotARepository {
            path: path.to_path_buf(),
        },
        _ => classify("open")(e),
    })
}

fn find_remote<'r>(repo: &'r Repository, name: &str) -> Result<git2::Remote<'r>, VcsError> {
    repo.find_remote(name).map_err(|e| {
        if is_not_found(&e) || e.class() == ErrorClass::Config {
            VcsError::RemoteMissing {
                name: name.to_string(),
            }
        } else {
            classify("remote")(e)
        }
    })
}

/// Map a libgit2 error to a [`VcsError`] kind, redacting any URL credentials
/// from the message.
fn classify(op: &'static str) -> impl Fn(git2::Error) -> VcsError {
    move |e| {
        let message = redact_credentials(e.message());
        match e.code() {
            ErrorCode::Auth => VcsError::Auth { op, message },
            _ => VcsError::Backend { op, message },
        }
    }
}

fn is_not_found(e: &git2::Error) -> bool {
    e.code() == ErrorCode::NotFound
}

fn io_err(path: &Path, source: std::io::Error) -> VcsError {
    VcsError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn signature(who: &Identity, at: DateTime<Utc>) -> Result<Signature<'static>, VcsError> {
    let time = git2::Time::new(at.timestamp(), 0);
    Signature::new(&who.name, &who.email, &time).map_err(classify("signature"))
}

fn merge_heads(repo: &mut Repository) -> Result<Vec<git2::Oid>, VcsError> {
    let mut ids = Vec::new();
    match repo.mergehead_foreach(|id| {
        ids.push(*id);
        true
    }) {
        Ok(()) => Ok(ids),
        Err(e) if is_not_found(&e) => Ok(Vec::new()),
        Err(e) => Err(classify("commit")(e)),
    }
}

fn has_unfinished_merge(repo: &Repository) -> Result<bool, VcsError> {
    if repo.state() != RepositoryState::Clean {
        return Ok(true);
    }
    let index = repo.index().map_err(classify("status"))?;
    Ok(index.has_conflicts())
}

fn conflicted_paths(index: &Index) -> Result<Vec<PathBuf>, VcsError> {
    let mut paths = Vec::new();
    for conflict in index.conflicts().map_err(classify("ls-files"))? {
        let conflict = conflict.map_err(classify("ls-files"))?;
        let entry = conflict.our.or(conflict.their).or(conflict.ancestor);
        if let Some(entry) = entry {
            paths.push(entry_path(&entry));
        }
    }
    paths.sort();
    paths.dedup();
    Ok(paths)
}

fn conflict_entry(
    index: &Index,
    file: &Path,
    side: ConflictSide,
) -> Result<Option<IndexEntry>, VcsError> {
    for conflict in index.conflicts().map_err(classify("ls-files"))? {
        let conflict = conflict.map_err(classify("ls-files"))?;
        let matches = [&conflict.our, &conflict.their, &conflict.ancestor]
            .iter()
            .any(|e| e.as_ref().is_some_and(|e| entry_path(e) == file));
        if matches {
            return Ok(match side {
                ConflictSide::Ours => conflict.our,
                ConflictSide::Theirs => conflict.their,
            });
        }
    }
    Err(VcsError::Backend {
        op: "ls-files",
        message: format!("{} is not in conflict", file.display()),
    })
}

#[cfg(unix)]
fn entry_path(entry: &IndexEntry) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(&entry.path))
}

#[cfg(not(unix))]
fn entry_path(entry: &IndexEntry) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(&entry.path).into_owned())
}

/// Credentials in order: configured token, then the user-info embedded in
/// the remote URL, then the git credential helper.
fn credential_callbacks<'a>(
    token: Option<ApiToken>,
    config: Option<git2::Config>,
) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    let mut attempts = 0u32;
    callbacks.credentials(move |url, username_from_url, allowed| {
        attempts += 1;
        if attempts > MAX_CREDENTIAL_ATTEMPTS {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                ErrorClass::Callback,
                "credentials rejected",
            ));
        }
        if allowed.is_user_pass_plaintext() {
            if attempts == 1 {
                if let Some(token) = &token {
                    return Cred::userpass_plaintext(token.expose(), TOKEN_PASSWORD);
                }
            }
            if attempts <= 2 {
                if let Some(user) = username_from_url {
                    return Cred::userpass_plaintext(user, TOKEN_PASSWORD);
                }
            }
            if let Some(config) = &config {
                if let Ok(cred) = Cred::credential_helper(config, url, username_from_url) {
                    return Ok(cred);
                }
            }
        }
        if allowed.is_ssh_key() {
            if let Some(user) = username_from_url {
                return Cred::ssh_key_from_agent(user);
            }
        }
        Cred::default()
    });
    callbacks
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn backend() -> Git2Backend {
        Git2Backend::new(
            None,
            Identity {
                name: "Mirror Test".into(),
                email: "mirror@example.com".into(),
            },
        )
    }

    fn request(message: &str) -> CommitRequest {
        CommitRequest::at(
            message,
            Identity {
                name: "Mirror Test".into(),
                email: "mirror@example.com".into(),
            },
            Utc::now(),
        )
    }

    #[test]
    fn init_uses_requested_branch() {
        let dir = TempDir::new().expect("tempdir");
        let vcs = backend();
        assert!(vcs.open_or_init(dir.path(), "main").expect("init"));
        assert!(!vcs.open_or_init(dir.path(), "main").expect("reopen"));
        assert!(matches!(
            vcs.current_branch(dir.path()),
            Err(VcsError::BranchUndetermined)
        ));

        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        vcs.stage_all(dir.path()).unwrap();
        vcs.commit(dir.path(), &request("first")).unwrap();
        assert_eq!(vcs.current_branch(dir.path()).unwrap(), "main");
    }

    #[test]
    fn plain_directory_is_not_a_repository() {
        let dir = TempDir::new().expect("tempdir");
        let vcs = backend();
        assert!(!vcs.is_repository(dir.path()));
        assert!(matches!(
            vcs.is_dirty(dir.path()),
            Err(VcsError::NotARepository { .. })
        ));
    }

    #[test]
    fn untracked_files_make_the_tree_dirty() {
        let dir = TempDir::new().expect("tempdir");
        let vcs = backend();
        vcs.open_or_init(dir.path(), "main").unwrap();
        assert!(!vcs.is_dirty(dir.path()).unwrap());
        std::fs::write(dir.path().join("new.txt"), "x").unwrap();
        assert!(vcs.is_dirty(dir.path()).unwrap());
        vcs.stage_all(dir.path()).unwrap();
        vcs.commit(dir.path(), &request("add")).unwrap();
        assert!(!vcs.is_dirty(dir.path()).unwrap());
    }

    #[test]
    fn ignored_files_do_not_count_as_dirty() {
        let dir = TempDir::new().expect("tempdir");
        let vcs = backend();
        vcs.open_or_init(dir.path(), "main").unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        vcs.stage_all(dir.path()).unwrap();
        vcs.commit(dir.path(), &request("ignore")).unwrap();
        std::fs::write(dir.path().join("debug.log"), "noise").unwrap();
        assert!(!vcs.is_dirty(dir.path()).unwrap());
    }

    #[test]
    fn stage_all_records_deletions() {
        let dir = TempDir::new().expect("tempdir");
        let vcs = backend();
        vcs.open_or_init(dir.path(), "main").unwrap();
        std::fs::write(dir.path().join("gone.txt"), "x").unwrap();
        vcs.stage_all(dir.path()).unwrap();
        vcs.commit(dir.path(), &request("add")).unwrap();

        std::fs::remove_file(dir.path().join("gone.txt")).unwrap();
        vcs.stage_all(dir.path()).unwrap();
        vcs.commit(dir.path(), &request("remove")).unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let tree = repo.head().unwrap().peel_to_tree().unwrap();
        assert!(tree.get_name("gone.txt").is_none());
    }

    #[test]
    fn commit_uses_explicit_timestamps() {
        let dir = TempDir::new().expect("tempdir");
        let vcs = backend();
        vcs.open_or_init(dir.path(), "main").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        vcs.stage_all(dir.path()).unwrap();

        let authored = DateTime::parse_from_rfc3339("2020-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let committed = DateTime::parse_from_rfc3339("2021-06-07T08:09:10Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut req = request("dated");
        req.authored_at = authored;
        req.committed_at = committed;
        vcs.commit(dir.path(), &req).unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.author().when().seconds(), authored.timestamp());
        assert_eq!(head.committer().when().seconds(), committed.timestamp());
        assert_eq!(head.author().name(), Some("Mirror Test"));
    }

    #[test]
    fn remote_url_round_trip() {
        let dir = TempDir::new().expect("tempdir");
        let vcs = backend();
        vcs.open_or_init(dir.path(), "main").unwrap();
        assert_eq!(vcs.remote_url(dir.path(), "origin").unwrap(), None);
        vcs.create_remote(dir.path(), "origin", "https://example.com/a.git")
            .unwrap();
        vcs.set_remote_url(dir.path(), "origin", "https://example.com/b.git")
            .unwrap();
        assert_eq!(
            vcs.remote_url(dir.path(), "origin").unwrap().as_deref(),
            Some("https://example.com/b.git")
        );
    }

    #[test]
    fn pull_without_remote_reports_remote_missing() {
        let dir = TempDir::new().expect("tempdir");
        let vcs = backend();
        vcs.open_or_init(dir.path(), "main").unwrap();
        assert!(matches!(
            vcs.pull(dir.path(), "origin", "main"),
            Err(VcsError::RemoteMissing { .. })
        ));
    }

    #[test]
    fn force_checkout_creates_branch_at_head() {
        let dir = TempDir::new().expect("tempdir");
        let vcs = backend();
        vcs.open_or_init(dir.path(), "master").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        vcs.stage_all(dir.path()).unwrap();
        vcs.commit(dir.path(), &request("first")).unwrap();

        vcs.force_checkout_branch(dir.path(), "main").unwrap();
        assert_eq!(vcs.current_branch(dir.path()).unwrap(), "main");
        assert!(!vcs.is_dirty(dir.path()).unwrap());
    }

    /// Leave `dir` in the middle of a merge where `a.txt` conflicts.
    fn conflicted_merge(dir: &Path, vcs: &Git2Backend) {
        vcs.open_or_init(dir, "main").unwrap();
        std::fs::write(dir.join("a.txt"), "base\n").unwrap();
        vcs.stage_all(dir).unwrap();
        vcs.commit(dir, &request("base")).unwrap();
        {
            let repo = Repository::open(dir).unwrap();
            let base = repo.head().unwrap().peel_to_commit().unwrap();
            repo.branch("other", &base, false).unwrap();
        }

        std::fs::write(dir.join("a.txt"), "ours\n").unwrap();
        vcs.stage_all(dir).unwrap();
        vcs.commit(dir, &request("ours")).unwrap();

        switch_to(dir, "other");
        std::fs::write(dir.join("a.txt"), "theirs\n").unwrap();
        vcs.stage_all(dir).unwrap();
        vcs.commit(dir, &request("theirs")).unwrap();
        switch_to(dir, "main");

        let repo = Repository::open(dir).unwrap();
        let theirs = repo.refname_to_id("refs/heads/other").unwrap();
        let incoming = repo.find_annotated_commit(theirs).unwrap();
        repo.merge(&[&incoming], None, None).unwrap();
        assert!(repo.index().unwrap().has_conflicts());
    }

    fn switch_to(dir: &Path, branch: &str) {
        let repo = Repository::open(dir).unwrap();
        repo.set_head(&format!("refs/heads/{branch}")).unwrap();
        repo.checkout_head(Some(CheckoutBuilder::new().force()))
            .unwrap();
    }

    #[test]
    fn abort_merge_returns_to_head() {
        let dir = TempDir::new().expect("tempdir");
        let vcs = backend();
        conflicted_merge(dir.path(), &vcs);
        assert!(vcs.merge_in_progress(dir.path()).unwrap());

        vcs.abort_merge(dir.path()).unwrap();
        let repo = Repository::open(dir.path()).unwrap();
        assert_eq!(repo.state(), RepositoryState::Clean);
        assert!(!repo.index().unwrap().has_conflicts());
        assert!(!vcs.merge_in_progress(dir.path()).unwrap());
    }

    #[test]
    fn abort_merge_with_unborn_head_empties_the_index() {
        let dir = TempDir::new().expect("tempdir");
        let vcs = backend();
        vcs.open_or_init(dir.path(), "main").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        vcs.stage_all(dir.path()).unwrap();
        std::fs::write(
            dir.path().join(".git/MERGE_HEAD"),
            "0123456789abcdef0123456789abcdef01234567\n",
        )
        .unwrap();
        assert_eq!(
            Repository::open(dir.path()).unwrap().state(),
            RepositoryState::Merge
        );

        vcs.abort_merge(dir.path()).unwrap();
        let repo = Repository::open(dir.path()).unwrap();
        assert_eq!(repo.state(), RepositoryState::Clean);
        assert!(repo.index().unwrap().is_empty());
        assert!(dir.path().join("a.txt").exists(), "working tree is kept");
    }

    #[test]
    fn concluding_commit_takes_the_merge_head_as_second_parent() {
        let dir = TempDir::new().expect("tempdir");
        let vcs = backend();
        conflicted_merge(dir.path(), &vcs);

        std::fs::write(dir.path().join("a.txt"), "theirs\n").unwrap();
        vcs.stage_path(dir.path(), Path::new("a.txt")).unwrap();
        vcs.commit(dir.path(), &request("resolve").concluding_merge())
            .unwrap();

        let repo = Repository::open(dir.path()).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.parent_count(), 2);
        assert_eq!(
            head.parent_id(1).unwrap(),
            repo.refname_to_id("refs/heads/other").unwrap()
        );
        assert_eq!(repo.state(), RepositoryState::Clean);
    }

    #[test]
    fn auth_errors_are_classified_and_redacted() {
        let err = git2::Error::new(
            ErrorCode::Auth,
            ErrorClass::Http,
            "authentication failed for 'https://tok@github.com/me/a.git'",
        );
        match classify("push")(err) {
            VcsError::Auth { op, message } => {
                assert_eq!(op, "push");
                assert!(!message.contains("tok@"), "leaked: {message}");
            }
            other => panic!("expected Auth, got {other:?}"),
        }
    }
}
