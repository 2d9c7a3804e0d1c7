#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use git2::{Oid, Repository, RepositoryInitOptions};
use tempfile::TempDir;

use mirror_core::{Identity, RepoName, StateStore};
use mirror_sync::vcs::CommitRequest;
use mirror_sync::{
    EngineOptions, Git2Backend, HostingBackend, HostingError, ProjectDir, ReconciliationEngine,
    RemoteRepository, StateLedger, VcsBackend,
};

/// Hosting backend that creates bare repositories in a local directory.
pub struct FakeHosting {
    root: PathBuf,
    fail: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl FakeHosting {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            fail: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next_calls(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn repo_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.git"))
    }
}

impl HostingBackend for FakeHosting {
    fn create_or_get_repository(
        &self,
        name: &RepoName,
        _private: bool,
        _description: &str,
    ) -> Result<RemoteRepository, HostingError> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostingError::Status {
                status: 500,
                message: "server error".into(),
            });
        }
        let path = self.repo_path(name.as_str());
        let created = !path.exists();
        if created {
            init_bare(&path);
        }
        Ok(RemoteRepository {
            name: name.clone(),
            clone_url: path.to_string_lossy().into_owned(),
            created,
        })
    }
}

pub fn init_bare(path: &Path) -> Repository {
    let mut opts = RepositoryInitOptions::new();
    opts.bare(true).initial_head("main");
    Repository::init_opts(path, &opts).expect("init bare remote")
}

pub fn identity() -> Identity {
    Identity {
        name: "Mirror Test".into(),
        email: "mirror@example.com".into(),
    }
}

pub fn options() -> EngineOptions {
    EngineOptions {
        default_branch: "main".into(),
        remote: "origin".into(),
        private_repos: true,
        backdate_commits: false,
        fallback_identity: identity(),
    }
}

/// A project root, a remotes directory, and an engine wired to both.
pub struct Harness {
    pub workspace: TempDir,
    pub remotes: TempDir,
    pub home: TempDir,
    pub hosting: Arc<FakeHosting>,
    pub engine: Arc<ReconciliationEngine>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_options(options())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        let workspace = TempDir::new().expect("workspace");
        let remotes = TempDir::new().expect("remotes");
        let home = TempDir::new().expect("home");
        let hosting = Arc::new(FakeHosting::new(remotes.path()));
        let ledger = StateLedger::open(StateStore::new(home.path().join("tracked_repos.json")))
            .expect("open ledger");
        let engine = Arc::new(ReconciliationEngine::new(
            Arc::new(Git2Backend::new(None, identity())),
            hosting.clone(),
            Arc::new(ledger),
            options,
        ));
        Self {
            workspace,
            remotes,
            home,
            hosting,
            engine,
        }
    }

    pub fn state_path(&self) -> PathBuf {
        self.home.path().join("tracked_repos.json")
    }

    /// Create `<workspace>/<name>` holding `files`.
    pub fn project(&self, name: &str, files: &[(&str, &str)]) -> ProjectDir {
        let dir = self.workspace.path().join(name);
        fs::create_dir_all(&dir).expect("project dir");
        for (file, content) in files {
            write(&dir.join(file), content);
        }
        ProjectDir::from_path(&dir).expect("project")
    }

    pub fn remote_of(&self, project: &ProjectDir) -> PathBuf {
        self.hosting.repo_path(project.repo_name.as_str())
    }
}

pub fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("parent dir");
    }
    fs::write(path, content).expect("write file");
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("read file")
}

pub fn commit_count(repo: &Path, refname: &str) -> usize {
    let repo = Repository::open(repo).expect("open repo");
    let Ok(tip) = repo.refname_to_id(refname) else {
        return 0;
    };
    let mut walk = repo.revwalk().expect("revwalk");
    walk.push(tip).expect("push tip");
    walk.count()
}

pub fn ref_id(repo: &Path, refname: &str) -> Oid {
    Repository::open(repo)
        .expect("open repo")
        .refname_to_id(refname)
        .expect("ref exists")
}

/// Blob content of `file` in the commit at `refname`.
pub fn file_at(repo: &Path, refname: &str, file: &str) -> Option<String> {
    let repo = Repository::open(repo).expect("open repo");
    let commit = repo
        .find_reference(refname)
        .expect("ref")
        .peel_to_commit()
        .expect("commit");
    let tree = commit.tree().expect("tree");
    let entry = tree.get_path(Path::new(file)).ok()?;
    let blob = repo.find_blob(entry.id()).expect("blob");
    Some(String::from_utf8_lossy(blob.content()).into_owned())
}

/// Tree entry names of the commit at `refname` in `dir` (non-recursive).
pub fn names_at(repo: &Path, refname: &str) -> Vec<String> {
    let repo = Repository::open(repo).expect("open repo");
    let commit = repo
        .find_reference(refname)
        .expect("ref")
        .peel_to_commit()
        .expect("commit");
    let tree = commit.tree().expect("tree");
    tree.iter()
        .filter_map(|e| e.name().map(str::to_string))
        .collect()
}

/// Clone the bare `remote` into `into` (a second machine editing the repo).
pub fn clone_remote(remote: &Path, into: &Path) -> PathBuf {
    Repository::clone(&remote.to_string_lossy(), into).expect("clone");
    into.to_path_buf()
}

/// Stage everything in `repo`, commit, and push `main` to origin.
pub fn commit_and_push(repo: &Path, message: &str) {
    let vcs = Git2Backend::new(None, identity());
    vcs.stage_all(repo).expect("stage");
    vcs.commit(repo, &CommitRequest::at(message, identity(), Utc::now()))
        .expect("commit");
    let updates = vcs
        .push(repo, "origin", "refs/heads/main:refs/heads/main", false)
        .expect("push");
    assert!(updates.iter().all(|u| u.error.is_none()), "push rejected: {updates:?}");
}
