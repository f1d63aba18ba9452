//! Check scheduler
//!
//! One dispatcher task selects the checkable with the earliest next-check
//! time from an ordered idle set, gates it, and hands it to a spawned
//! worker. Workers move the checkable from `pending` back into `idle`
//! when the execution finishes. All mutation of the two sets is
//! serialized on one mutex; the `Notify` plays the condition variable.

use crate::checkable::Checkable;
use crate::executor;
use crate::runtime::Runtime;
use crate::signals::SignalGuard;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default cap on concurrently executing checks
pub const DEFAULT_CONCURRENT_CHECKS: usize = 512;

/// Clock regressions beyond this trigger a controlled shutdown
const MAX_CLOCK_REGRESSION: f64 = 3600.0;

/// Upper bound on one dispatcher wait, so gate changes are picked up even
/// if a wakeup is missed
const MAX_WAIT: Duration = Duration::from_secs(1);

fn time_key(t: f64) -> i64 {
    (t * 1_000_000.0) as i64
}

struct PendingCheck {
    checkable: Arc<Checkable>,
    since: f64,
}

#[derive(Default)]
struct CheckerState {
    /// Idle checkables ordered by (next_check, name)
    idle: BTreeMap<(i64, String), Arc<Checkable>>,
    /// Current idle ordering key per checkable
    idle_key: HashMap<String, i64>,
    /// Checkables currently being executed
    pending: HashMap<String, PendingCheck>,
    stopped: bool,
    last_seen_now: f64,
}

impl CheckerState {
    fn insert_idle(&mut self, checkable: Arc<Checkable>) {
        let name = checkable.name().to_string();
        let key = time_key(checkable.next_check());
        self.idle.insert((key, name.clone()), checkable);
        self.idle_key.insert(name, key);
    }

    fn remove_idle(&mut self, name: &str) -> Option<Arc<Checkable>> {
        let key = self.idle_key.remove(name)?;
        self.idle.remove(&(key, name.to_string()))
    }
}

pub(crate) struct CheckerShared {
    state: Mutex<CheckerState>,
    notify: Notify,
    max_concurrent: usize,
}

/// The scheduler component
pub struct Checker {
    rt: Arc<Runtime>,
    shared: Arc<CheckerShared>,
    _rekey_guard: SignalGuard,
}

enum Step {
    Shutdown,
    ClockRegression,
    Continue,
    WaitIdle,
    WaitUntilDue(f64),
    Reschedule(Arc<Checkable>),
    Execute(Arc<Checkable>),
}

impl Checker {
    pub fn new(rt: Arc<Runtime>, max_concurrent: usize) -> Arc<Self> {
        let shared = Arc::new(CheckerShared {
            state: Mutex::new(CheckerState::default()),
            notify: Notify::new(),
            max_concurrent: max_concurrent.max(1),
        });

        // re-key the ordered index whenever a next-check time changes;
        // the only mutation path that keeps the index invariant
        let rekey_guard = {
            let shared = shared.clone();
            rt.signals.on_next_check_updated.connect(move |event| {
                let mut state = shared.state.lock();
                let name = event.checkable.name();

                let Some(old_key) = state.idle_key.get(name).copied() else {
                    return;
                };

                let new_key = time_key(event.next_check);
                if new_key == old_key {
                    return;
                }

                if let Some(checkable) = state.idle.remove(&(old_key, name.to_string())) {
                    state.idle.insert((new_key, name.to_string()), checkable);
                    state.idle_key.insert(name.to_string(), new_key);
                }

                drop(state);
                shared.notify.notify_waiters();
            })
        };

        Arc::new(Self {
            rt,
            shared,
            _rekey_guard: rekey_guard,
        })
    }

    /// Add a checkable to the idle set if it is active and ours
    pub fn register(&self, checkable: &Arc<Checkable>) {
        if !checkable.is_active() || !checkable.has_authority() {
            return;
        }

        {
            let mut state = self.shared.state.lock();

            if state.pending.contains_key(checkable.name())
                || state.idle_key.contains_key(checkable.name())
            {
                return;
            }

            state.insert_idle(checkable.clone());
        }

        self.shared.notify.notify_waiters();
    }

    /// Register every eligible checkable known to the runtime
    pub fn register_all(&self) {
        for checkable in self.rt.checkables_snapshot() {
            self.register(&checkable);
        }
    }

    /// Remove a checkable from both sets
    pub fn unregister(&self, name: &str) {
        {
            let mut state = self.shared.state.lock();
            state.remove_idle(name);
            state.pending.remove(name);
        }

        self.shared.notify.notify_waiters();
    }

    pub fn stop(&self) {
        self.shared.state.lock().stopped = true;
        self.shared.notify.notify_waiters();
    }

    pub fn idle_count(&self) -> usize {
        self.shared.state.lock().idle.len()
    }

    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    pub fn is_idle(&self, name: &str) -> bool {
        self.shared.state.lock().idle_key.contains_key(name)
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.shared.state.lock().pending.contains_key(name)
    }

    fn outside_check_period(&self, checkable: &Checkable, now: f64) -> bool {
        let Some(period) = &checkable.config().check_period else {
            return false;
        };

        match self.rt.timeperiod(period) {
            Some(tp) => !tp.is_inside(now),
            None => false,
        }
    }

    fn next_step(&self) -> Step {
        let now = self.rt.now();
        let mut state = self.shared.state.lock();

        if state.stopped {
            return Step::Shutdown;
        }

        if state.last_seen_now - now > MAX_CLOCK_REGRESSION {
            return Step::ClockRegression;
        }
        if now > state.last_seen_now {
            state.last_seen_now = now;
        }

        let Some(((key, name), checkable)) = state
            .idle
            .iter()
            .next()
            .map(|(key, checkable)| ((key.0, key.1.clone()), checkable.clone()))
        else {
            return Step::WaitIdle;
        };

        if !checkable.has_authority() || !checkable.is_active() {
            state.idle.remove(&(key, name.clone()));
            state.idle_key.remove(&name);
            return Step::Continue;
        }

        let wait = checkable.next_check() - now;
        if wait > 0.0 {
            return Step::WaitUntilDue(wait);
        }

        state.idle.remove(&(key, name.clone()));
        state.idle_key.remove(&name);

        let forced = checkable.force_next_check_flag();

        if !forced {
            if !checkable.active_checks_enabled() || !self.rt.flags.checks_enabled() {
                tracing::debug!(
                    target: "vigil_engine::scheduler",
                    checkable = %name,
                    "skipping check: active checks are disabled"
                );
                return Step::Reschedule(checkable);
            }

            if self.outside_check_period(&checkable, now) {
                tracing::debug!(
                    target: "vigil_engine::scheduler",
                    checkable = %name,
                    "skipping check: outside check period"
                );
                return Step::Reschedule(checkable);
            }
        }

        if state.pending.len() >= self.shared.max_concurrent {
            state.insert_idle(checkable);
            return Step::WaitIdle;
        }

        state.pending.insert(
            name,
            PendingCheck {
                checkable: checkable.clone(),
                since: now,
            },
        );

        Step::Execute(checkable)
    }

    /// The dispatcher loop; runs until [`stop`](Self::stop)
    pub async fn run(self: Arc<Self>) {
        tracing::info!(target: "vigil_engine::scheduler", "check scheduler started");

        loop {
            match self.next_step() {
                Step::Shutdown => break,
                Step::ClockRegression => {
                    tracing::error!(
                        target: "vigil_engine::scheduler",
                        "clock went backwards by more than {MAX_CLOCK_REGRESSION}s, shutting down"
                    );
                    self.rt.request_shutdown();
                    break;
                }
                Step::Continue => continue,
                Step::WaitIdle => {
                    let _ = tokio::time::timeout(MAX_WAIT, self.shared.notify.notified()).await;
                }
                Step::WaitUntilDue(wait) => {
                    let wait = Duration::from_secs_f64(wait.max(0.001)).min(MAX_WAIT);
                    let _ = tokio::time::timeout(wait, self.shared.notify.notified()).await;
                }
                Step::Reschedule(checkable) => {
                    checkable.update_next_check(&self.rt);

                    let mut state = self.shared.state.lock();
                    if !state.pending.contains_key(checkable.name()) {
                        state.insert_idle(checkable);
                    }
                }
                Step::Execute(checkable) => {
                    checkable.clear_force_next_check();

                    tracing::debug!(
                        target: "vigil_engine::scheduler",
                        checkable = %checkable.name(),
                        "executing check"
                    );

                    let rt = self.rt.clone();
                    let shared = self.shared.clone();

                    tokio::spawn(async move {
                        if let Err(err) = executor::execute_check(&rt, &checkable).await {
                            tracing::error!(
                                target: "vigil_engine::scheduler",
                                checkable = %checkable.name(),
                                error = %err,
                                "check execution failed"
                            );
                        }

                        finish_check(&shared, &checkable);
                    });
                }
            }
        }

        tracing::info!(target: "vigil_engine::scheduler", "check scheduler stopped");
    }

    /// Age in seconds of the oldest pending check, for diagnostics
    pub fn oldest_pending_age(&self, now: f64) -> Option<f64> {
        let state = self.shared.state.lock();
        state
            .pending
            .values()
            .map(|p| now - p.since)
            .max_by(f64::total_cmp)
    }

    /// The scheduler's periodic status line
    pub fn log_status(&self) {
        let now = self.rt.now();

        let (pending, idle) = {
            let state = self.shared.state.lock();
            (state.pending.len(), state.idle.len())
        };

        let rate = self.rt.stats.active_checks(now, 5) as f64 / 5.0;
        let oldest = self.oldest_pending_age(now).unwrap_or(0.0);

        tracing::info!(
            target: "vigil_engine::scheduler",
            pending,
            idle,
            checks_per_sec = rate,
            oldest_pending_secs = oldest,
            "scheduler status"
        );
    }
}

/// Worker epilogue: move the checkable back into the idle set
fn finish_check(shared: &Arc<CheckerShared>, checkable: &Arc<Checkable>) {
    let mut state = shared.state.lock();

    // absent means a forced/manual run; it is already back in idle
    if state.pending.remove(checkable.name()).is_some() {
        if checkable.is_active() && checkable.has_authority() {
            state.insert_idle(checkable.clone());
        }

        drop(state);
        shared.notify.notify_waiters();
    }
}
