//! # mirror-sync
//!
//! Reconciliation engine and its collaborators.
//!
//! - [`vcs`] / [`git`]: version-control seam and its libgit2 backend
//! - [`hosting`]: create-or-get of remote repositories (GitHub over `ureq`)
//! - [`ledger`]: lock-protected state document
//! - [`resolver`]: remote-wins conflict resolution that keeps local copies
//! - [`engine`]: per-project bootstrap / update state machine
//! - [`scan`] / [`pipeline`]: project discovery and the batch run

pub mod engine;
pub mod error;
pub mod git;
pub mod hosting;
pub mod ledger;
pub mod pipeline;
pub mod resolver;
pub mod scan;
pub mod vcs;

pub use engine::{CycleOutcome, EngineOptions, ReconciliationEngine};
pub use error::SyncError;
pub use git::Git2Backend;
pub use hosting::{GithubHosting, HostingBackend, HostingError, RemoteRepository};
pub use ledger::StateLedger;
pub use pipeline::{live_engine, update_message, ProjectReport, SyncOrchestrator, SyncSummary};
pub use resolver::{ConflictRecord, ConflictResolver, LOCAL_COPY_MARKER};
pub use scan::{normalize_path, scan_roots, ProjectDir, ScanReport};
pub use vcs::{PullOutcome, VcsBackend, VcsError};
