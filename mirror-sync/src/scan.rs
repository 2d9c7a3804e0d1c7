//! Project discovery: immediate, non-hidden subdirectories of each root.

use std::path::{Path, PathBuf};

use mirror_core::RepoName;

use crate::error::{io_err, SyncError};

/// A discovered project folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDir {
    /// Absolute path; the key in the state document.
    pub path: PathBuf,
    pub folder_name: String,
    pub repo_name: RepoName,
}

impl ProjectDir {
    /// Build from a folder path, deriving the repository name from the
    /// folder name.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let path = normalize_path(path.as_ref())?;
        let folder_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let repo_name = RepoName::slugify(&folder_name).ok_or_else(|| SyncError::InvalidRepoName {
            folder: folder_name.clone(),
        })?;
        Ok(Self {
            path,
            folder_name,
            repo_name,
        })
    }
}

/// A folder that was found but cannot be mirrored.
#[derive(Debug)]
pub struct Ineligible {
    pub path: PathBuf,
    pub error: SyncError,
}

/// Result of scanning every configured root.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub projects: Vec<ProjectDir>,
    pub ineligible: Vec<Ineligible>,
    /// Roots that could not be listed; the others were still scanned.
    pub skipped_roots: Vec<PathBuf>,
}

/// List project folders under `roots`, in root order then path order.
pub fn scan_roots(roots: &[PathBuf]) -> ScanReport {
    let mut report = ScanReport::default();
    for root in roots {
        match list_subdirectories(root) {
            Ok(dirs) => {
                for dir in dirs {
                    match ProjectDir::from_path(&dir) {
                        Ok(project) => report.projects.push(project),
                        Err(error) => {
                            tracing::warn!(path = %dir.display(), error = %error, "skipping folder");
                            report.ineligible.push(Ineligible { path: dir, error });
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "cannot read root, skipping it");
                report.skipped_roots.push(root.clone());
            }
        }
    }
    report
}

/// Non-hidden directories directly under `root`, sorted.
pub fn list_subdirectories(root: &Path) -> Result<Vec<PathBuf>, SyncError> {
    let root = normalize_path(root)?;
    let entries = std::fs::read_dir(&root).map_err(|e| io_err(&root, e))?;
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(&root, e))?;
        if is_hidden(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

pub fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// The form every project path takes before it is used as a state key or
/// watched: absolute, with `.`/`..` and symlinks resolved.
///
/// A path that no longer exists keeps its canonical parent and its own file
/// name, so a vanished project still maps to the key it was recorded under.
pub fn normalize_path(path: &Path) -> Result<PathBuf, SyncError> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|e| io_err(path, e))?;
        cwd.join(path)
    };
    if let Ok(real) = std::fs::canonicalize(&absolute) {
        return Ok(real);
    }
    match (absolute.parent(), absolute.file_name()) {
        (Some(parent), Some(name)) => match std::fs::canonicalize(parent) {
            Ok(real_parent) => Ok(real_parent.join(name)),
            Err(_) => Ok(absolute),
        },
        _ => Ok(absolute),
    }
}
