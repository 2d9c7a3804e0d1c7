//! Domain types for the mirror state document.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Remote repository identifier derived from a project folder name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RepoName(pub String);

impl RepoName {
    /// Derive a repository name from a folder name.
    ///
    /// Lowercases, turns spaces and underscores into hyphens, then drops every
    /// character outside `[a-z0-9-]`. Returns `None` when nothing survives.
    pub fn slugify(folder_name: &str) -> Option<Self> {
        let slug: String = folder_name
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '_' { '-' } else { c })
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
            .collect();
        if slug.is_empty() {
            None
        } else {
            Some(Self(slug))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for RepoName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RepoName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Remote binding of one local project folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedProject {
    pub repo_name: RepoName,
    /// Authenticated clone URL. Carries a credential; display it only through
    /// [`redact_credentials`].
    pub repo_url: String,
    pub last_sync: DateTime<Utc>,
}

impl TrackedProject {
    pub fn redacted_url(&self) -> String {
        redact_credentials(&self.repo_url)
    }
}

/// Root of the persisted state document: absolute project path → binding.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackedState {
    pub projects: BTreeMap<PathBuf, TrackedProject>,
}

impl TrackedState {
    pub fn get(&self, path: &Path) -> Option<&TrackedProject> {
        self.projects.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.projects.contains_key(path)
    }

    pub fn insert(&mut self, path: PathBuf, project: TrackedProject) -> Option<TrackedProject> {
        self.projects.insert(path, project)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PathBuf, &TrackedProject)> {
        self.projects.iter()
    }
}

// ---------------------------------------------------------------------------
// Credential redaction
// ---------------------------------------------------------------------------

/// Replace the user-info part of every URL in `text` with `***`.
///
/// `https://<token>@github.com/o/r.git` becomes `https://***@github.com/o/r.git`.
/// Text without URLs is returned unchanged.
pub fn redact_credentials(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(idx) = rest.find("://") {
        let (head, tail) = rest.split_at(idx + 3);
        out.push_str(head);
        let authority_end = tail
            .find(|c: char| c == '/' || c.is_whitespace() || c == '\'' || c == '"')
            .unwrap_or(tail.len());
        let authority = &tail[..authority_end];
        match authority.rfind('@') {
            Some(at) => {
                out.push_str("***");
                out.push_str(&authority[at..]);
            }
            None => out.push_str(authority),
        }
        rest = &tail[authority_end..];
    }
    out.push_str(rest);
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
