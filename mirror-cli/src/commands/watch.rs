//! `mirror watch`: long-running change watcher.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use mirror_core::Config;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Root directories to watch. Overrides MIRROR_ROOTS when given.
    pub roots: Vec<PathBuf>,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        let config = Config::from_env()
            .context("invalid configuration")?
            .with_roots(self.roots);
        config.require_roots().context("invalid configuration")?;

        println!(
            "Watching {} root(s), syncing {}s after the last change. Press Ctrl-C to stop.",
            config.roots.len(),
            config.sync_delay.as_secs()
        );
        mirror_daemon::start_blocking(config).context("watch exited with error")?;
        println!("Watcher stopped.");
        Ok(())
    }
}
