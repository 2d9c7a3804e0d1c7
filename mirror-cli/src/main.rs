//! Mirror: keep local project folders mirrored to hosted git repositories.
//!
//! # Usage
//!
//! ```text
//! mirror sync [ROOTS...]
//! mirror watch [ROOTS...]
//! mirror status [--json]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{status::StatusArgs, sync::SyncArgs, watch::WatchArgs};

#[derive(Parser, Debug)]
#[command(
    name = "mirror",
    version,
    about = "Mirror local project folders to hosted git repositories",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one pass over every project folder under the roots.
    Sync(SyncArgs),

    /// Watch the roots and sync projects as they change, until Ctrl-C.
    Watch(WatchArgs),

    /// List tracked projects from the state document.
    Status(StatusArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    mirror_daemon::init_tracing();
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Watch(args) => args.run(),
        Commands::Status(args) => args.run(),
    }
}
