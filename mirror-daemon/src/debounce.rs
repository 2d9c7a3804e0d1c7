//! Per-project trailing-edge debounce.
//!
//! Every event for a project cancels that project's pending timer and arms a
//! new one, so a trigger fires once the project has been quiet for the full
//! delay. Projects never cancel each other. A trigger that would land within
//! `min_interval` of the project's previous trigger is re-armed for the
//! remainder instead of being dropped.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

#[derive(Clone)]
pub struct Debouncer {
    inner: Arc<Inner>,
}

struct Inner {
    delay: Duration,
    min_interval: Duration,
    table: Mutex<Table>,
    trigger_tx: mpsc::UnboundedSender<PathBuf>,
}

#[derive(Default)]
struct Table {
    pending: HashMap<PathBuf, PendingSync>,
    last_fired: HashMap<PathBuf, Instant>,
    next_generation: u64,
}

struct PendingSync {
    generation: u64,
    timer: JoinHandle<()>,
}

impl Debouncer {
    /// Returns the debouncer and the receiver its triggers are delivered on.
    pub fn new(delay: Duration, min_interval: Duration) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            delay,
            min_interval,
            table: Mutex::new(Table::default()),
            trigger_tx,
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            trigger_rx,
        )
    }

    /// Record an event for `project`, restarting its quiet period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, project: PathBuf) {
        let mut table = self.inner.lock();
        if let Some(previous) = table.pending.remove(&project) {
            previous.timer.abort();
        }
        let delay = self.inner.delay;
        arm(&self.inner, &mut table, project, delay);
    }

    /// Number of projects with a timer currently armed.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Abort every armed timer.
    pub fn cancel_all(&self) {
        let mut table = self.inner.lock();
        for (_, pending) in table.pending.drain() {
            pending.timer.abort();
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fire(self: &Arc<Self>, project: PathBuf, generation: u64) {
        let mut table = self.lock();
        match table.pending.get(&project) {
            Some(pending) if pending.generation == generation => {}
            // Superseded by a newer event.
            _ => return,
        }
        table.pending.remove(&project);

        let now = Instant::now();
        if let Some(last) = table.last_fired.get(&project) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.min_interval {
                let remaining = self.min_interval - elapsed;
                tracing::debug!(
                    project = %project.display(),
                    remaining_ms = remaining.as_millis() as u64,
                    "trigger too soon after previous sync, re-arming"
                );
                arm(self, &mut table, project, remaining);
                return;
            }
        }

        table.last_fired.insert(project.clone(), now);
        drop(table);
        if self.trigger_tx.send(project).is_err() {
            tracing::debug!("trigger receiver dropped");
        }
    }
}

fn arm(inner: &Arc<Inner>, table: &mut Table, project: PathBuf, after: Duration) {
    let generation = table.next_generation;
    table.next_generation += 1;

    // Measured from now, not from when the runtime first polls the task.
    let deadline = Instant::now() + after;
    let task_inner = Arc::clone(inner);
    let task_project = project.clone();
    let timer = tokio::spawn(async move {
        sleep_until(deadline).await;
        task_inner.fire(task_project, generation);
    });
    table.pending.insert(project, PendingSync { generation, timer });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    const DELAY: Duration = Duration::from_secs(5);

    fn project(name: &str) -> PathBuf {
        PathBuf::from("/work").join(name)
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn burst_of_events_yields_one_trigger_after_quiet_period() {
        let (debouncer, mut triggers) = Debouncer::new(DELAY, DELAY);
        let mut last_event = Instant::now();
        for _ in 0..10 {
            last_event = Instant::now();
            debouncer.schedule(project("notes"));
            advance(Duration::from_millis(500)).await;
        }

        let fired = triggers.recv().await.expect("trigger");
        assert_eq!(fired, project("notes"));
        let waited = Instant::now().duration_since(last_event);
        assert!(
            waited >= DELAY && waited < DELAY + Duration::from_millis(50),
            "fired {waited:?} after the last event"
        );

        advance(Duration::from_secs(30)).await;
        assert!(triggers.try_recv().is_err(), "burst must coalesce");
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn projects_are_debounced_independently() {
        let (debouncer, mut triggers) = Debouncer::new(DELAY, DELAY);
        let start = Instant::now();
        debouncer.schedule(project("alpha"));
        advance(Duration::from_secs(3)).await;
        debouncer.schedule(project("beta"));

        assert_eq!(triggers.recv().await, Some(project("alpha")));
        assert!(Instant::now().duration_since(start) < Duration::from_secs(6));
        assert_eq!(triggers.recv().await, Some(project("beta")));
        assert!(Instant::now().duration_since(start) >= Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn trigger_within_min_interval_is_rearmed_not_dropped() {
        let min_interval = Duration::from_secs(10);
        let (debouncer, mut triggers) = Debouncer::new(Duration::from_secs(1), min_interval);

        debouncer.schedule(project("notes"));
        assert_eq!(triggers.recv().await, Some(project("notes")));
        let first_fired = Instant::now();

        debouncer.schedule(project("notes"));
        assert_eq!(triggers.recv().await, Some(project("notes")));
        let gap = Instant::now().duration_since(first_fired);
        assert!(
            gap >= min_interval && gap < min_interval + Duration::from_millis(50),
            "second trigger after {gap:?}"
        );

        advance(Duration::from_secs(30)).await;
        assert!(triggers.try_recv().is_err());
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn quiet_period_starts_when_the_event_is_scheduled() {
        let (debouncer, mut triggers) = Debouncer::new(DELAY, DELAY);
        debouncer.schedule(project("notes"));
        // The clock moves before the timer task has had a chance to run.
        advance(DELAY).await;

        let fired = tokio::time::timeout(Duration::from_millis(10), triggers.recv()).await;
        assert_eq!(fired.ok().flatten(), Some(project("notes")));
    }

    #[tokio::test(start_paused = true, flavor = "current_thread")]
    async fn cancel_all_drops_pending_timers() {
        let (debouncer, mut triggers) = Debouncer::new(DELAY, DELAY);
        debouncer.schedule(project("alpha"));
        debouncer.schedule(project("beta"));
        assert_eq!(debouncer.pending(), 2);

        debouncer.cancel_all();
        advance(Duration::from_secs(30)).await;
        assert!(triggers.try_recv().is_err());
        assert_eq!(debouncer.pending(), 0);
    }
}
