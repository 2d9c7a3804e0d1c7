//! Event path classification for watch mode.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

/// Path fragments that never trigger a sync. `_local_` covers the resolver's
/// own backup files, which would otherwise re-trigger the project forever.
pub const IGNORED_FRAGMENTS: &[&str] = &[
    ".git",
    "__pycache__",
    ".pyc",
    ".venv",
    "venv",
    ".env",
    "node_modules",
    ".DS_Store",
    "_local_",
];

/// Default minimum spacing between two triggers of the same project.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5);

/// Decides which filesystem events matter and which project they belong to.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    roots: Vec<PathBuf>,
    fragments: Vec<String>,
}

impl WatchFilter {
    /// `state_file`'s file name is ignored in addition to [`IGNORED_FRAGMENTS`].
    pub fn new(roots: Vec<PathBuf>, state_file: &Path) -> Self {
        let mut fragments: Vec<String> = IGNORED_FRAGMENTS.iter().map(|f| f.to_string()).collect();
        if let Some(name) = state_file.file_name() {
            fragments.push(name.to_string_lossy().into_owned());
        }
        Self { roots, fragments }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Matches any ignore fragment anywhere below its root.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let relative = self
            .roots
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .unwrap_or(path);
        let text = relative.to_string_lossy();
        self.fragments.iter().any(|f| text.contains(f.as_str()))
    }

    /// The project folder owning `path`: the first component below a root.
    ///
    /// `None` for paths outside every root, entries directly in a root, and
    /// hidden top-level folders.
    pub fn owning_project(&self, path: &Path) -> Option<PathBuf> {
        for root in &self.roots {
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let mut components = relative.components();
            let first = match components.next() {
                Some(Component::Normal(name)) => name,
                _ => continue,
            };
            if components.next().is_none() {
                return None;
            }
            if first.to_string_lossy().starts_with('.') {
                return None;
            }
            return Some(root.join(first));
        }
        None
    }

    /// Project that should be scheduled for `path`, after filtering.
    pub fn route(&self, path: &Path) -> Option<PathBuf> {
        if self.is_ignored(path) {
            return None;
        }
        self.owning_project(path)
    }
}
