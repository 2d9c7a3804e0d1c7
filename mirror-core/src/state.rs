//! Persisted tracking state.
//!
//! # Storage layout
//!
//! ```text
//! ~/.mirror/
//!   tracked_repos.json   (mode 0600: clone URLs carry credentials)
//! ```
//!
//! The whole document is read and written at once. `save` is atomic from the
//! caller's view (`.tmp` sibling + rename) but not safe against concurrent
//! writers; callers serialize saves themselves.

use std::path::{Path, PathBuf};

use crate::error::{io_err, StateError};
use crate::types::TrackedState;

/// File name of the state document.
pub const STATE_FILE_NAME: &str = "tracked_repos.json";

/// `<home>/.mirror/`
pub fn mirror_root(home: &Path) -> PathBuf {
    home.join(".mirror")
}

/// `<home>/.mirror/tracked_repos.json`: pure, no I/O.
pub fn default_path_at(home: &Path) -> PathBuf {
    mirror_root(home).join(STATE_FILE_NAME)
}

/// `default_path_at` convenience wrapper.
pub fn default_path() -> Result<PathBuf, StateError> {
    let home = dirs::home_dir().ok_or(StateError::HomeNotFound)?;
    Ok(default_path_at(&home))
}

/// Handle on the state document at a fixed path.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document.
    ///
    /// Returns an empty mapping if the file does not exist and
    /// `StateError::Corrupt` if it exists but cannot be parsed.
    pub fn load(&self) -> Result<TrackedState, StateError> {
        if !self.path.exists() {
            return Ok(TrackedState::default());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        if contents.trim().is_empty() {
            return Ok(TrackedState::default());
        }
        serde_json::from_str(&contents).map_err(|source| StateError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Atomically overwrite the document.
    ///
    /// Write flow: serialize → `.json.tmp` sibling → `chmod 0600` → `rename`.
    pub fn save(&self, state: &TrackedState) -> Result<(), StateError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
                set_dir_permissions(dir)?;
            }
        }

        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.tmp_path();
        std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&self.path, e));
        }
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| STATE_FILE_NAME.to_string());
        self.path.with_file_name(format!("{name}.tmp"))
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StateError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StateError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StateError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StateError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
