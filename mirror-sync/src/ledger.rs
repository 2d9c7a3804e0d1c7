//! Shared, lock-protected view of the state document.
//!
//! [`StateStore::save`] is not safe against concurrent writers, and in watch
//! mode several projects can finish at once. Every mutation here updates the
//! in-memory mapping and persists the whole document while holding one
//! mutex.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use mirror_core::{RepoName, StateError, StateStore, TrackedProject, TrackedState};

#[derive(Debug)]
pub struct StateLedger {
    store: StateStore,
    state: Mutex<TrackedState>,
}

impl StateLedger {
    /// Load the document behind `store`. A corrupt document is an error.
    pub fn open(store: StateStore) -> Result<Self, StateError> {
        let state = store.load()?;
        tracing::debug!(path = %store.path().display(), projects = state.len(), "loaded state document");
        Ok(Self {
            store,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn get(&self, project: &Path) -> Option<TrackedProject> {
        self.lock().get(project).cloned()
    }

    pub fn is_tracked(&self, project: &Path) -> bool {
        self.lock().contains(project)
    }

    /// Insert (or replace) the binding for `project` and persist.
    pub fn record(
        &self,
        project: &Path,
        repo_name: RepoName,
        repo_url: String,
        last_sync: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let mut state = self.lock();
        let previous = state.insert(
            project.to_path_buf(),
            TrackedProject {
                repo_name,
                repo_url,
                last_sync,
            },
        );
        if let Err(e) = self.store.save(&state) {
            restore(&mut state, project, previous);
            return Err(e);
        }
        Ok(())
    }

    /// Set `last_sync` for an already tracked project and persist.
    /// Returns `false` when the project is not tracked.
    pub fn mark_synced(&self, project: &Path, at: DateTime<Utc>) -> Result<bool, StateError> {
        let mut state = self.lock();
        let Some(entry) = state.projects.get_mut(project) else {
            return Ok(false);
        };
        let previous = std::mem::replace(&mut entry.last_sync, at);
        if let Err(e) = self.store.save(&state) {
            if let Some(entry) = state.projects.get_mut(project) {
                entry.last_sync = previous;
            }
            return Err(e);
        }
        Ok(true)
    }

    pub fn snapshot(&self) -> TrackedState {
        self.lock().clone()
    }

    /// Tracked paths that are no longer directories.
    pub fn missing_paths(&self) -> Vec<PathBuf> {
        self.lock()
            .iter()
            .filter(|(path, _)| !path.is_dir())
            .map(|(path, _)| path.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, TrackedState> {
        // A panic mid-update leaves the last consistent mapping in place.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn restore(state: &mut TrackedState, project: &Path, previous: Option<TrackedProject>) {
    match previous {
        Some(entry) => {
            state.insert(project.to_path_buf(), entry);
        }
        None => {
            state.projects.remove(project);
        }
    }
}
