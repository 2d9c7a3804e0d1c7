//! Merge-conflict resolution without discarding local work.
//!
//! For every conflicted file the incoming version wins at the original path,
//! and the pre-merge local version is saved next to it as
//! `<stem>_local_<YYYYMMDD_HHMMSS>[.<ext>]`. Both are staged and committed
//! in one commit that concludes the merge.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use mirror_core::Identity;

use crate::vcs::{CommitRequest, ConflictSide, VcsBackend, VcsError};

/// Marker embedded in every backup file name.
pub const LOCAL_COPY_MARKER: &str = "_local_";

pub const RESOLUTION_MESSAGE: &str =
    "Resolve merge conflicts: keep remote versions, save local copies as *_local_*";

/// One file resolved during a pull attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    /// Path relative to the working tree; holds the remote content.
    pub original_path: PathBuf,
    /// Relative path of the saved local content. `None` when the local side
    /// had deleted the file, so there was nothing to save.
    pub local_copy_path: Option<PathBuf>,
}

pub struct ConflictResolver<'a> {
    vcs: &'a dyn VcsBackend,
}

impl<'a> ConflictResolver<'a> {
    pub fn new(vcs: &'a dyn VcsBackend) -> Self {
        Self { vcs }
    }

    /// Resolve every file in `conflicted` (or, when empty, every unmerged
    /// path in the index) and commit the result.
    ///
    /// A file that cannot be captured or staged is logged and skipped. Only a
    /// failure of the final commit is returned.
    pub fn resolve(
        &self,
        repo: &Path,
        conflicted: &[PathBuf],
        author: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Vec<ConflictRecord>, VcsError> {
        let paths = if conflicted.is_empty() {
            self.vcs.unmerged_paths(repo)?
        } else {
            conflicted.to_vec()
        };

        let stamp = now.format("%Y%m%d_%H%M%S").to_string();
        let mut records = Vec::with_capacity(paths.len());
        for file in &paths {
            match self.resolve_one(repo, file, &stamp) {
                Ok(record) => {
                    tracing::info!(
                        file = %file.display(),
                        local_copy = ?record.local_copy_path,
                        "conflict resolved, remote version kept"
                    );
                    records.push(record);
                }
                Err(e) => {
                    tracing::warn!(file = %file.display(), error = %e, "could not resolve conflicted file, skipping");
                    // Stage whatever is on disk so the merge can still conclude.
                    if let Err(e) = self.vcs.stage_path(repo, file) {
                        tracing::warn!(file = %file.display(), error = %e, "could not stage conflicted file");
                    }
                }
            }
        }

        let request = CommitRequest::at(RESOLUTION_MESSAGE, author.clone(), now).concluding_merge();
        self.vcs.commit(repo, &request)?;
        Ok(records)
    }

    fn resolve_one(
        &self,
        repo: &Path,
        file: &Path,
        stamp: &str,
    ) -> Result<ConflictRecord, VcsError> {
        let local = self.vcs.read_conflict_side(repo, file, ConflictSide::Ours)?;
        let local_copy_path = match local {
            Some(content) => Some(write_local_copy(repo, file, stamp, &content)?),
            None => None,
        };

        self.vcs.checkout_theirs(repo, file)?;
        self.vcs.stage_path(repo, file)?;
        if let Some(copy) = &local_copy_path {
            self.vcs.stage_path(repo, copy)?;
        }

        Ok(ConflictRecord {
            original_path: file.to_path_buf(),
            local_copy_path,
        })
    }
}

/// `report.md` + `20240512_093000` → `report_local_20240512_093000.md`.
pub fn local_copy_name(file_name: &str, stamp: &str, attempt: u32) -> String {
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let suffix = if attempt == 0 {
        String::new()
    } else {
        format!("_{attempt}")
    };
    match path.extension() {
        Some(ext) => format!(
            "{stem}{LOCAL_COPY_MARKER}{stamp}{suffix}.{}",
            ext.to_string_lossy()
        ),
        None => format!("{stem}{LOCAL_COPY_MARKER}{stamp}{suffix}"),
    }
}

/// Write `content` to a fresh sibling of `file`; never overwrites.
/// Returns the path relative to `repo`.
fn write_local_copy(
    repo: &Path,
    file: &Path,
    stamp: &str,
    content: &[u8],
) -> Result<PathBuf, VcsError> {
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| VcsError::Backend {
            op: "resolve",
            message: format!("conflicted path {} has no file name", file.display()),
        })?;

    let mut attempt = 0;
    loop {
        let relative = file.with_file_name(local_copy_name(&file_name, stamp, attempt));
        let absolute = repo.join(&relative);
        match OpenOptions::new().write(true).create_new(true).open(&absolute) {
            Ok(mut out) => {
                out.write_all(content).map_err(|source| VcsError::Io {
                    path: absolute.clone(),
                    source,
                })?;
                return Ok(relative);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(source) => {
                return Err(VcsError::Io {
                    path: absolute,
                    source,
                })
            }
        }
    }
}
