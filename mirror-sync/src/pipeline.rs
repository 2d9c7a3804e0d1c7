//! Batch sync pipeline used by `mirror sync`.
//!
//! Also the place where the live engine (git2 + GitHub) is assembled from
//! [`Config`], so `sync` and `watch` build it the same way.

use std::path::PathBuf;
use std::sync::Arc;

use mirror_core::{Config, StateStore};

use crate::engine::{CycleOutcome, EngineOptions, ReconciliationEngine};
use crate::error::SyncError;
use crate::git::Git2Backend;
use crate::hosting::GithubHosting;
use crate::ledger::StateLedger;
use crate::scan::{scan_roots, ProjectDir};

/// Commit message for batch updates.
pub fn update_message(folder_name: &str) -> String {
    format!("Update {folder_name}")
}

/// Build the engine backed by libgit2 and the GitHub API.
///
/// Fails when the state document cannot be read.
pub fn live_engine(config: &Config) -> Result<ReconciliationEngine, SyncError> {
    let ledger = StateLedger::open(StateStore::new(&config.state_file))?;
    let hosting = GithubHosting::new(
        config.api_base.clone(),
        config.username.clone(),
        config.token.clone(),
    );
    let vcs = Git2Backend::new(Some(config.token.clone()), config.identity());
    Ok(ReconciliationEngine::new(
        Arc::new(vcs),
        Arc::new(hosting),
        Arc::new(ledger),
        EngineOptions::from_config(config),
    ))
}

/// Outcome of one project in a batch run.
#[derive(Debug)]
pub struct ProjectReport {
    pub path: PathBuf,
    pub folder_name: String,
    pub result: Result<CycleOutcome, SyncError>,
}

/// Everything a batch run did.
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub reports: Vec<ProjectReport>,
    /// Tracked folders that no longer exist; skipped, still tracked.
    pub missing: Vec<PathBuf>,
    pub skipped_roots: Vec<PathBuf>,
}

impl SyncSummary {
    pub fn synced(&self) -> usize {
        self.reports.iter().filter(|r| r.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.iter().filter(|r| r.result.is_err()).count()
    }
}

pub struct SyncOrchestrator {
    engine: Arc<ReconciliationEngine>,
    roots: Vec<PathBuf>,
}

impl SyncOrchestrator {
    pub fn new(engine: Arc<ReconciliationEngine>, roots: Vec<PathBuf>) -> Self {
        Self { engine, roots }
    }

    /// Scan every root and run one cycle per project folder.
    ///
    /// Per-project failures are recorded in the summary. Only a state
    /// document failure stops the run and is returned as an error.
    pub fn run_once(&self) -> Result<SyncSummary, SyncError> {
        let scan = scan_roots(&self.roots);
        tracing::info!(
            projects = scan.projects.len(),
            roots = self.roots.len(),
            "scan complete"
        );

        let mut summary = SyncSummary {
            skipped_roots: scan.skipped_roots,
            ..SyncSummary::default()
        };

        for ineligible in scan.ineligible {
            summary.reports.push(ProjectReport {
                folder_name: folder_of(&ineligible.path),
                path: ineligible.path,
                result: Err(ineligible.error),
            });
        }

        for project in scan.projects {
            let report = self.run_project(&project)?;
            summary.reports.push(report);
        }

        summary.missing = self.engine.ledger().missing_paths();
        for path in &summary.missing {
            tracing::warn!(path = %path.display(), "tracked folder no longer exists, skipping");
        }

        tracing::info!(
            synced = summary.synced(),
            failed = summary.failed(),
            missing = summary.missing.len(),
            "sync run finished"
        );
        Ok(summary)
    }

    fn run_project(&self, project: &ProjectDir) -> Result<ProjectReport, SyncError> {
        let span = tracing::info_span!("project", repo = %project.repo_name);
        let _entered = span.enter();

        let result = self
            .engine
            .reconcile(project, &update_message(&project.folder_name));
        match &result {
            Ok(outcome) => tracing::info!(path = %project.path.display(), ?outcome, "synced"),
            Err(e) if e.is_fatal() => {
                tracing::error!(path = %project.path.display(), error = %e, "state document failure, stopping");
            }
            Err(e) => tracing::warn!(path = %project.path.display(), error = %e, "sync failed"),
        }
        let result = match result {
            Err(e) if e.is_fatal() => return Err(e),
            other => other,
        };
        Ok(ProjectReport {
            path: project.path.clone(),
            folder_name: project.folder_name.clone(),
            result,
        })
    }
}

fn folder_of(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
