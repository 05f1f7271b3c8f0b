//! Debounced update trigger for watch mode.
//!
//! [`TriggerState`] is the pure state machine; [`WatchTrigger`] drives it on
//! a tokio runtime with a restartable delay timer and runs updates on the
//! blocking pool, one at a time.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::sync::{SyncReport, Synchronizer};
use crate::{Error, Result};

/// Something that can run an incremental update for a set of countries.
pub trait UpdateRunner: Send + Sync + 'static {
    /// Run one update. Called on a blocking thread, never concurrently.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails as a whole.
    fn run_update(&self, countries: &[String]) -> Result<SyncReport>;
}

impl UpdateRunner for Synchronizer {
    fn run_update(&self, countries: &[String]) -> Result<SyncReport> {
        self.sync(countries, false)
    }
}

/// Watch trigger states.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TriggerState {
    /// Nothing pending.
    #[default]
    Idle,
    /// Waiting for the quiet period to elapse.
    Debouncing { pending: BTreeSet<String> },
    /// An update is running for `pending`.
    Updating { pending: BTreeSet<String> },
    /// An update is running and more countries changed meanwhile.
    UpdatingWithQueued {
        pending: BTreeSet<String>,
        queued: BTreeSet<String>,
    },
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerAction {
    None,
    /// Start the delay timer, cancelling any running one.
    ScheduleTimer,
    /// Start an update for these countries.
    RunUpdate(Vec<String>),
}

impl TriggerState {
    /// A source file for `country` changed.
    pub fn on_file_event(&mut self, country: &str) -> TriggerAction {
        match self {
            Self::Idle => {
                *self = Self::Debouncing {
                    pending: BTreeSet::from([country.to_string()]),
                };
                TriggerAction::ScheduleTimer
            }
            Self::Debouncing { pending } => {
                pending.insert(country.to_string());
                TriggerAction::ScheduleTimer
            }
            Self::Updating { pending } => {
                let pending = std::mem::take(pending);
                *self = Self::UpdatingWithQueued {
                    pending,
                    queued: BTreeSet::from([country.to_string()]),
                };
                TriggerAction::None
            }
            Self::UpdatingWithQueued { queued, .. } => {
                queued.insert(country.to_string());
                TriggerAction::None
            }
        }
    }

    /// The delay timer elapsed.
    pub fn on_timer_fired(&mut self) -> TriggerAction {
        match self {
            Self::Debouncing { pending } => {
                let pending = std::mem::take(pending);
                let countries = pending.iter().cloned().collect();
                *self = Self::Updating { pending };
                TriggerAction::RunUpdate(countries)
            }
            _ => TriggerAction::None,
        }
    }

    /// The running update finished, successfully or not.
    pub fn on_update_complete(&mut self) -> TriggerAction {
        match self {
            Self::Updating { .. } => {
                *self = Self::Idle;
                TriggerAction::None
            }
            Self::UpdatingWithQueued { queued, .. } => {
                let queued = std::mem::take(queued);
                *self = Self::Debouncing { pending: queued };
                TriggerAction::ScheduleTimer
            }
            _ => TriggerAction::None,
        }
    }

    /// Whether an update is in flight.
    #[must_use]
    pub const fn is_updating(&self) -> bool {
        matches!(self, Self::Updating { .. } | Self::UpdatingWithQueued { .. })
    }
}

struct Machine {
    state: TriggerState,
    timer: Option<JoinHandle<()>>,
    /// Bumped on every timer (re)start; a firing with an older value is stale.
    generation: u64,
    closed: bool,
}

struct Inner {
    machine: Mutex<Machine>,
    runtime: Handle,
    debounce: Duration,
    runner: Arc<dyn UpdateRunner>,
    runs: AtomicU64,
    settled: Notify,
}

/// Drives [`TriggerState`] with real timers and update runs.
///
/// Clone is cheap and clones share the same machine. [`Self::notify`] may be
/// called from any thread and never blocks on a running update.
#[derive(Clone)]
pub struct WatchTrigger {
    inner: Arc<Inner>,
}

impl WatchTrigger {
    /// Create a trigger on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if called outside a tokio runtime.
    pub fn new(runner: Arc<dyn UpdateRunner>, debounce: Duration) -> Result<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::internal(format!("watch trigger needs a tokio runtime: {e}")))?;

        Ok(Self {
            inner: Arc::new(Inner {
                machine: Mutex::new(Machine {
                    state: TriggerState::Idle,
                    timer: None,
                    generation: 0,
                    closed: false,
                }),
                runtime,
                debounce,
                runner,
                runs: AtomicU64::new(0),
                settled: Notify::new(),
            }),
        })
    }

    /// Record a change for `country`.
    pub fn notify(&self, country: &str) {
        let mut machine = self.inner.machine.lock();
        if machine.closed {
            return;
        }
        let action = machine.state.on_file_event(country);
        tracing::debug!(country = %country, state = ?machine.state, "File change recorded");
        self.inner.apply(&mut machine, action);
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> TriggerState {
        self.inner.machine.lock().state.clone()
    }

    /// Number of completed update runs.
    #[must_use]
    pub fn completed_runs(&self) -> u64 {
        self.inner.runs.load(Ordering::Relaxed)
    }

    /// Stop accepting events, drop any pending debounce and wait for an
    /// in-flight update to finish.
    pub async fn shutdown(&self) {
        loop {
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();

            {
                let mut machine = self.inner.machine.lock();
                machine.closed = true;
                if let Some(timer) = machine.timer.take() {
                    timer.abort();
                }
                if !machine.state.is_updating() {
                    if machine.state != TriggerState::Idle {
                        tracing::info!(state = ?machine.state, "Dropping pending changes on shutdown");
                    }
                    machine.state = TriggerState::Idle;
                    return;
                }
            }

            tracing::info!("Waiting for running update to finish");
            settled.await;
        }
    }
}

impl std::fmt::Debug for WatchTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchTrigger")
            .field("debounce", &self.inner.debounce)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn apply(self: &Arc<Self>, machine: &mut Machine, action: TriggerAction) {
        match action {
            TriggerAction::None => {}
            TriggerAction::ScheduleTimer => {
                if let Some(timer) = machine.timer.take() {
                    timer.abort();
                }
                if machine.closed {
                    machine.state = TriggerState::Idle;
                    return;
                }

                machine.generation += 1;
                let generation = machine.generation;
                let inner = Arc::clone(self);
                machine.timer = Some(self.runtime.spawn(async move {
                    tokio::time::sleep(inner.debounce).await;
                    inner.timer_fired(generation);
                }));
            }
            TriggerAction::RunUpdate(countries) => {
                tracing::info!(countries = ?countries, "Running incremental update");
                let inner = Arc::clone(self);
                self.runtime.spawn(async move {
                    let runner = Arc::clone(&inner.runner);
                    let result =
                        tokio::task::spawn_blocking(move || runner.run_update(&countries)).await;

                    match result {
                        Ok(Ok(report)) => tracing::info!(
                            changed = report.files_changed,
                            removed = report.files_removed,
                            failed = report.failures.len(),
                            elapsed_ms = report.elapsed_ms,
                            "Update complete"
                        ),
                        Ok(Err(e)) => tracing::error!(error = %e, "Update failed"),
                        Err(e) => tracing::error!(error = %e, "Update task panicked"),
                    }

                    inner.update_complete();
                });
            }
        }
    }

    fn timer_fired(self: &Arc<Self>, generation: u64) {
        let mut machine = self.machine.lock();
        if machine.generation != generation {
            return;
        }
        // This task is the timer; never abort it from here.
        machine.timer = None;
        let action = machine.state.on_timer_fired();
        self.apply(&mut machine, action);
    }

    fn update_complete(self: &Arc<Self>) {
        self.runs.fetch_add(1, Ordering::Relaxed);
        {
            let mut machine = self.machine.lock();
            let action = machine.state.on_update_complete();
            if action == TriggerAction::ScheduleTimer && !machine.closed {
                tracing::info!(state = ?machine.state, "Changes arrived during update, scheduling follow-up");
            }
            self.apply(&mut machine, action);
        }
        self.settled.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_idle_to_debouncing_and_reset() {
        let mut state = TriggerState::Idle;
        assert_eq!(state.on_file_event("jp"), TriggerAction::ScheduleTimer);
        assert_eq!(state.on_file_event("cn"), TriggerAction::ScheduleTimer);
        assert_eq!(
            state,
            TriggerState::Debouncing {
                pending: set(&["cn", "jp"])
            }
        );
    }

    #[test]
    fn test_timer_starts_update() {
        let mut state = TriggerState::Debouncing {
            pending: set(&["jp", "cn"]),
        };
        assert_eq!(
            state.on_timer_fired(),
            TriggerAction::RunUpdate(vec!["cn".to_string(), "jp".to_string()])
        );
        assert!(state.is_updating());

        // A stale firing does nothing.
        assert_eq!(state.on_timer_fired(), TriggerAction::None);
        assert_eq!(TriggerState::Idle.on_timer_fired(), TriggerAction::None);
    }

    #[test]
    fn test_events_during_update_are_queued() {
        let mut state = TriggerState::Updating {
            pending: set(&["jp"]),
        };
        assert_eq!(state.on_file_event("kr"), TriggerAction::None);
        assert_eq!(state.on_file_event("cn"), TriggerAction::None);
        assert_eq!(
            state,
            TriggerState::UpdatingWithQueued {
                pending: set(&["jp"]),
                queued: set(&["cn", "kr"])
            }
        );

        assert_eq!(state.on_update_complete(), TriggerAction::ScheduleTimer);
        assert_eq!(
            state,
            TriggerState::Debouncing {
                pending: set(&["cn", "kr"])
            }
        );
    }

    #[test]
    fn test_update_complete_without_queue_goes_idle() {
        let mut state = TriggerState::Updating {
            pending: set(&["jp"]),
        };
        assert_eq!(state.on_update_complete(), TriggerAction::None);
        assert_eq!(state, TriggerState::Idle);
        assert_eq!(state.on_update_complete(), TriggerAction::None);
    }

    struct RecordingRunner {
        runs: mpsc::UnboundedSender<Vec<String>>,
        /// Blocks the first run until released.
        gate: Mutex<Option<std::sync::mpsc::Receiver<()>>>,
    }

    impl UpdateRunner for RecordingRunner {
        fn run_update(&self, countries: &[String]) -> Result<SyncReport> {
            let _ = self.runs.send(countries.to_vec());
            if let Some(gate) = self.gate.lock().take() {
                let _ = gate.recv();
            }
            Err(Error::internal("recording runner has no store"))
        }
    }

    fn recording(
        gate: Option<std::sync::mpsc::Receiver<()>>,
    ) -> (Arc<RecordingRunner>, mpsc::UnboundedReceiver<Vec<String>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(RecordingRunner {
                runs: tx,
                gate: Mutex::new(gate),
            }),
            rx,
        )
    }

    const DEBOUNCE: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn test_burst_triggers_single_delayed_run() {
        let (runner, mut runs) = recording(None);
        let trigger = WatchTrigger::new(runner, DEBOUNCE).unwrap();

        trigger.notify("jp");
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.notify("cn");
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.notify("jp");
        let last_event = Instant::now();

        let countries = runs.recv().await.unwrap();
        let waited = last_event.elapsed();
        assert_eq!(countries, vec!["cn".to_string(), "jp".to_string()]);
        assert!(waited >= DEBOUNCE, "ran after {waited:?}");
        assert!(waited < DEBOUNCE + Duration::from_secs(1), "ran after {waited:?}");

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(runs.try_recv().is_err());
        assert_eq!(trigger.completed_runs(), 1);
        assert_eq!(trigger.state(), TriggerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_during_run_queues_one_follow_up() {
        let (release, gate) = std::sync::mpsc::channel();
        let (runner, mut runs) = recording(Some(gate));
        let trigger = WatchTrigger::new(runner, DEBOUNCE).unwrap();

        trigger.notify("jp");
        assert_eq!(runs.recv().await.unwrap(), vec!["jp".to_string()]);

        // First run is blocked on the gate.
        trigger.notify("kr");
        trigger.notify("kr");
        assert_eq!(
            trigger.state(),
            TriggerState::UpdatingWithQueued {
                pending: set(&["jp"]),
                queued: set(&["kr"])
            }
        );
        let queued_at = Instant::now();
        release.send(()).unwrap();

        assert_eq!(runs.recv().await.unwrap(), vec!["kr".to_string()]);
        assert!(queued_at.elapsed() >= DEBOUNCE);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(runs.try_recv().is_err());
        assert_eq!(trigger.completed_runs(), 2);
        assert_eq!(trigger.state(), TriggerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending_debounce() {
        let (runner, mut runs) = recording(None);
        let trigger = WatchTrigger::new(runner, DEBOUNCE).unwrap();

        trigger.notify("jp");
        trigger.shutdown().await;
        trigger.notify("cn");

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(runs.try_recv().is_err());
        assert_eq!(trigger.state(), TriggerState::Idle);
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let (runner, _runs) = recording(None);
        assert!(WatchTrigger::new(runner, DEBOUNCE).is_err());
    }
}
