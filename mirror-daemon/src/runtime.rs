use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::event::{CreateKind, RemoveKind};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use mirror_core::Config;
use mirror_sync::{
    live_engine, normalize_path, CycleOutcome, ProjectDir, ReconciliationEngine, SyncError,
};

use crate::debounce::Debouncer;
use crate::error::{io_err, DaemonError};
use crate::paths::WatchFilter;

/// Commit message for watch-triggered cycles.
pub fn watch_message(folder_name: &str) -> String {
    format!("Auto-sync: {folder_name}")
}

/// Knobs for one watch session.
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub roots: Vec<PathBuf>,
    /// Quiet period before a project's trigger fires.
    pub delay: Duration,
    /// Minimum spacing between two triggers of the same project.
    pub min_interval: Duration,
    pub state_file: PathBuf,
}

impl WatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            roots: config.roots.clone(),
            delay: config.sync_delay,
            min_interval: config.sync_delay,
            state_file: config.state_file.clone(),
        }
    }
}

/// Start watch mode and block the current thread until Ctrl-C.
pub fn start_blocking(config: Config) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(config))
}

/// Run watch mode with the live engine until Ctrl-C.
pub async fn run(config: Config) -> Result<(), DaemonError> {
    config.require_roots()?;
    let settings = WatchSettings::from_config(&config);
    let engine = Arc::new(live_engine(&config)?);

    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("received ctrl-c, stopping watcher"),
            Err(err) => tracing::error!(error = %err, "ctrl-c handler failed, stopping watcher"),
        }
    };
    watch(engine, settings, ctrl_c).await
}

/// Watch `settings.roots` and reconcile projects as they change, until
/// `shutdown` completes or a cycle hits a fatal error.
///
/// Cycles already running when shutdown arrives are allowed to finish.
pub async fn watch<F>(
    engine: Arc<ReconciliationEngine>,
    settings: WatchSettings,
    shutdown: F,
) -> Result<(), DaemonError>
where
    F: Future<Output = ()> + Send,
{
    let roots = watchable_roots(&settings.roots);
    if roots.is_empty() {
        return Err(DaemonError::NothingToWatch);
    }
    let filter = WatchFilter::new(roots, &settings.state_file);
    let (debouncer, trigger_rx) = Debouncer::new(settings.delay, settings.min_interval);
    let (shutdown_tx, mut stopped) = broadcast::channel::<()>(4);

    let watcher_handle = {
        let shutdown = shutdown_tx.clone();
        let debouncer = debouncer.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = watcher_task(filter, debouncer, rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let dispatcher_handle = {
        let shutdown = shutdown_tx.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let result = dispatcher_task(engine, trigger_rx, rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    tokio::select! {
        _ = shutdown => {
            let _ = shutdown_tx.send(());
        }
        _ = stopped.recv() => {}
    }
    debouncer.cancel_all();

    let (watcher_result, dispatcher_result) = tokio::join!(watcher_handle, dispatcher_handle);
    handle_join("watcher", watcher_result)?;
    handle_join("dispatcher", dispatcher_result)?;
    Ok(())
}

/// Read filesystem events and arm project timers. Never waits on a sync.
async fn watcher_task(
    filter: WatchFilter,
    debouncer: Debouncer,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = recommended_watcher(move |event| {
        let _ = event_tx.send(event);
    })?;
    for root in filter.roots() {
        watcher.watch(root, RecursiveMode::Recursive)?;
        tracing::info!(root = %root.display(), "watching");
    }

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = event_rx.recv() => {
                let Some(event) = event else {
                    return Err(DaemonError::ChannelClosed("watcher events"));
                };
                match event {
                    Ok(event) => {
                        for project in projects_for_event(&filter, &event) {
                            tracing::debug!(project = %project.display(), "change detected");
                            debouncer.schedule(project);
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "watcher event error"),
                }
            }
        }
    }

    drop(watcher);
    Ok(())
}

/// Run one cycle per trigger on the blocking pool. Returns an error only
/// for a fatal (state document) failure.
async fn dispatcher_task(
    engine: Arc<ReconciliationEngine>,
    mut trigger_rx: mpsc::UnboundedReceiver<PathBuf>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut in_flight: JoinSet<Result<(), SyncError>> = JoinSet::new();
    let mut outcome = Ok(());

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            trigger = trigger_rx.recv() => {
                let Some(project) = trigger else { break };
                let engine = engine.clone();
                in_flight.spawn(async move {
                    tokio::task::spawn_blocking(move || sync_project(&engine, project))
                        .await
                        .unwrap_or_else(|err| {
                            tracing::error!(error = %err, "sync task join error");
                            Ok(())
                        })
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(err) = flatten(joined) {
                    outcome = Err(err);
                    break;
                }
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(err) = flatten(joined) {
            if outcome.is_ok() {
                outcome = Err(err);
            }
        }
    }
    outcome
}

fn flatten(
    joined: Result<Result<(), SyncError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(DaemonError::Sync(err)),
        Err(err) => Err(DaemonError::Join {
            task: "sync",
            message: err.to_string(),
        }),
    }
}

/// One watch-triggered cycle. Non-fatal failures are logged and swallowed.
fn sync_project(engine: &ReconciliationEngine, path: PathBuf) -> Result<(), SyncError> {
    let project = match ProjectDir::from_path(&path) {
        Ok(project) => project,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "cannot mirror folder");
            return Ok(());
        }
    };
    let span = tracing::info_span!("project", repo = %project.repo_name);
    let _entered = span.enter();

    match engine.reconcile(&project, &watch_message(&project.folder_name)) {
        Ok(CycleOutcome::Unchanged) => {
            tracing::debug!(path = %project.path.display(), "nothing to sync");
            Ok(())
        }
        Ok(outcome) => {
            tracing::info!(path = %project.path.display(), ?outcome, "synced");
            Ok(())
        }
        Err(err) if err.is_fatal() => {
            tracing::error!(path = %project.path.display(), error = %err, "state document failure, stopping");
            Err(err)
        }
        Err(err) => {
            tracing::warn!(path = %project.path.display(), error = %err, "sync failed");
            Ok(())
        }
    }
}

/// Projects an event should schedule, after kind and ignore filtering.
fn projects_for_event(filter: &WatchFilter, event: &Event) -> Vec<PathBuf> {
    if !is_relevant_event_kind(&event.kind) {
        return Vec::new();
    }
    let mut projects: Vec<PathBuf> = event
        .paths
        .iter()
        .filter(|path| !path.is_dir())
        .filter_map(|path| filter.route(path))
        .collect();
    projects.sort();
    projects.dedup();
    projects
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => false,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        _ => false,
    }
}

/// Canonicalized roots that exist; the rest are skipped with a warning.
fn watchable_roots(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut watchable = Vec::new();
    for root in roots {
        // Events arrive with real paths (e.g. /private/var on macOS), and the
        // projects derived from them must match the keys a batch run records.
        match normalize_path(root) {
            Ok(real) if real.is_dir() => watchable.push(real),
            Ok(_) => tracing::warn!(root = %root.display(), "root is missing or not a directory, skipping"),
            Err(err) => {
                tracing::warn!(root = %root.display(), error = %err, "cannot watch root, skipping")
            }
        }
    }
    watchable
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Join {
            task,
            message: err.to_string(),
        }),
    }
}

/// Install the global fmt subscriber on stderr. `RUST_LOG` overrides the
/// `info` default.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
