//! `mirror sync`: one batch pass over every project folder.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use mirror_core::Config;
use mirror_sync::{live_engine, CycleOutcome, ProjectReport, SyncOrchestrator, SyncSummary};

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Root directories to scan. Overrides MIRROR_ROOTS when given.
    pub roots: Vec<PathBuf>,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let config = Config::from_env()
            .context("invalid configuration")?
            .with_roots(self.roots);
        config.require_roots().context("invalid configuration")?;

        let engine = live_engine(&config).context("failed to open the state document")?;
        let summary = SyncOrchestrator::new(Arc::new(engine), config.roots.clone())
            .run_once()
            .context("sync aborted")?;

        print_summary(&summary);
        if summary.failed() > 0 {
            bail!("{} project(s) failed to sync", summary.failed());
        }
        Ok(())
    }
}

fn print_summary(summary: &SyncSummary) {
    for root in &summary.skipped_roots {
        println!("{} root {} could not be read", "!".yellow(), root.display());
    }
    for report in &summary.reports {
        println!("{}", report_line(report));
    }
    for path in &summary.missing {
        println!(
            "{} {} is tracked but no longer exists",
            "?".bright_black(),
            path.display()
        );
    }

    println!(
        "{} synced, {} failed",
        summary.synced().to_string().green().bold(),
        if summary.failed() > 0 {
            summary.failed().to_string().red().bold()
        } else {
            summary.failed().to_string().normal()
        },
    );
}

fn report_line(report: &ProjectReport) -> String {
    let name = &report.folder_name;
    match &report.result {
        Ok(CycleOutcome::Bootstrapped { repo_name, pushed }) => {
            let detail = if *pushed {
                "initial commit pushed"
            } else {
                "nothing to commit"
            };
            format!("{} '{name}' bound to {repo_name} ({detail})", "+".green())
        }
        Ok(CycleOutcome::Unchanged) => {
            format!("{} '{name}' up to date", "✓".bright_black())
        }
        Ok(CycleOutcome::Updated { conflicts, .. }) if conflicts.is_empty() => {
            format!("{} '{name}' pushed", "✓".green())
        }
        Ok(CycleOutcome::Updated { conflicts, .. }) => format!(
            "{} '{name}' pushed, {} conflict(s) resolved in favor of the remote",
            "✓".yellow(),
            conflicts.len()
        ),
        Err(err) => format!("{} '{name}' failed: {err}", "✗".red()),
    }
}
