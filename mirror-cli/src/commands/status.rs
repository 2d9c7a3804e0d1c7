//! `mirror status`: tracked projects from the state document.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use mirror_core::{config::state_file_from_env, StateStore, TrackedState};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let path = state_file_from_env().context("cannot locate the state document")?;
        let state = StateStore::new(&path)
            .load()
            .with_context(|| format!("failed to read {}", path.display()))?;

        let rows = build_rows(&state, Utc::now());
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(rows);
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct ProjectStatus {
    path: PathBuf,
    repo_name: String,
    /// Always redacted.
    repo_url: String,
    last_sync: DateTime<Utc>,
    last_sync_age: String,
    exists: bool,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "folder")]
    folder: String,
    #[tabled(rename = "repository")]
    repository: String,
    #[tabled(rename = "remote")]
    remote: String,
    #[tabled(rename = "last sync")]
    last_sync: String,
    #[tabled(rename = "folder exists")]
    exists: String,
}

fn build_rows(state: &TrackedState, now: DateTime<Utc>) -> Vec<ProjectStatus> {
    state
        .iter()
        .map(|(path, project)| ProjectStatus {
            path: path.clone(),
            repo_name: project.repo_name.to_string(),
            repo_url: project.redacted_url(),
            last_sync: project.last_sync,
            last_sync_age: format_age(now, project.last_sync),
            exists: path.is_dir(),
        })
        .collect()
}

fn print_table(rows: Vec<ProjectStatus>) {
    let missing = rows.iter().filter(|r| !r.exists).count();
    println!(
        "Mirror v{} | {} tracked | {} missing",
        env!("CARGO_PKG_VERSION"),
        rows.len(),
        missing,
    );

    if rows.is_empty() {
        println!("No projects tracked yet. Run 'mirror sync' to start.");
        return;
    }

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            folder: row.path.display().to_string(),
            repository: row.repo_name.bold().to_string(),
            remote: row.repo_url,
            last_sync: format!("{} ago", row.last_sync_age),
            exists: if row.exists {
                "yes".green().to_string()
            } else {
                "missing".red().bold().to_string()
            },
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");
}

fn format_age(now: DateTime<Utc>, then: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(then).num_seconds().max(0) as u64;
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}
