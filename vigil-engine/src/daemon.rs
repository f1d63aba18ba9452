//! Daemon supervisor
//!
//! Wires a runtime to a scheduler and the periodic sweeps, with a clean
//! start/shutdown lifecycle. Tests drive the runtime directly and only
//! reach for a `Daemon` when they need the background machinery.

use crate::comment;
use crate::downtime;
use crate::executor;
use crate::runtime::Runtime;
use crate::scheduled_downtime;
use crate::scheduler::Checker;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Fixed downtimes start within this period of their window opening
const DOWNTIME_START_PERIOD: Duration = Duration::from_secs(5);
/// Expiry, materializer, comment and agent sweeps share this period
const SWEEP_PERIOD: Duration = Duration::from_secs(60);
/// Scheduler status log line period
const STATUS_PERIOD: Duration = Duration::from_secs(5);

/// Owns the background tasks of one engine instance
pub struct Daemon {
    rt: Arc<Runtime>,
    checker: Arc<Checker>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Daemon {
    pub fn new(rt: Arc<Runtime>, max_concurrent_checks: usize) -> Self {
        let checker = Checker::new(rt.clone(), max_concurrent_checks);

        Self {
            rt,
            checker,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.rt
    }

    pub fn checker(&self) -> &Arc<Checker> {
        &self.checker
    }

    /// Register all checkables and spawn the dispatcher and sweeps
    pub fn start(&self) {
        self.checker.register_all();

        // materialize scheduled downtimes before the first dispatch
        scheduled_downtime::sweep(&self.rt);

        let mut tasks = self.tasks.lock();

        tasks.push(tokio::spawn(self.checker.clone().run()));
        tasks.push(tokio::spawn(downtime_start_loop(self.rt.clone())));
        tasks.push(tokio::spawn(downtime_expire_loop(self.rt.clone())));
        tasks.push(tokio::spawn(scheduled_downtime_loop(self.rt.clone())));
        tasks.push(tokio::spawn(comment_expire_loop(self.rt.clone())));
        tasks.push(tokio::spawn(agent_sweep_loop(self.rt.clone())));
        tasks.push(tokio::spawn(status_loop(
            self.rt.clone(),
            self.checker.clone(),
        )));

        tracing::info!(target: "vigil_engine::daemon", "engine started");
    }

    /// Stop the dispatcher, drain in-flight work and join every task
    pub async fn shutdown(&self) {
        self.rt.request_shutdown();
        self.checker.stop();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());

        for task in tasks {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    tracing::warn!(
                        target: "vigil_engine::daemon",
                        error = %err,
                        "background task ended abnormally"
                    );
                }
            }
        }

        tracing::info!(target: "vigil_engine::daemon", "engine stopped");
    }
}

async fn downtime_start_loop(rt: Arc<Runtime>) {
    let mut shutdown = rt.shutdown_subscribe();
    let mut interval = tokio::time::interval(DOWNTIME_START_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => downtime::sweep_start(&rt),
            changed = shutdown.changed() => {
                if changed.is_err() || rt.is_shutdown() {
                    break;
                }
            }
        }
    }
}

async fn downtime_expire_loop(rt: Arc<Runtime>) {
    let mut shutdown = rt.shutdown_subscribe();
    let mut interval = tokio::time::interval(SWEEP_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => downtime::sweep_expired(&rt),
            changed = shutdown.changed() => {
                if changed.is_err() || rt.is_shutdown() {
                    break;
                }
            }
        }
    }
}

async fn scheduled_downtime_loop(rt: Arc<Runtime>) {
    let mut shutdown = rt.shutdown_subscribe();
    let mut interval = tokio::time::interval(SWEEP_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => scheduled_downtime::sweep(&rt),
            changed = shutdown.changed() => {
                if changed.is_err() || rt.is_shutdown() {
                    break;
                }
            }
        }
    }
}

async fn comment_expire_loop(rt: Arc<Runtime>) {
    let mut shutdown = rt.shutdown_subscribe();
    let mut interval = tokio::time::interval(SWEEP_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => comment::sweep_expired(&rt),
            changed = shutdown.changed() => {
                if changed.is_err() || rt.is_shutdown() {
                    break;
                }
            }
        }
    }
}

async fn agent_sweep_loop(rt: Arc<Runtime>) {
    let mut shutdown = rt.shutdown_subscribe();
    let mut interval = tokio::time::interval(SWEEP_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => executor::sweep_stale_agents(&rt).await,
            changed = shutdown.changed() => {
                if changed.is_err() || rt.is_shutdown() {
                    break;
                }
            }
        }
    }
}

async fn status_loop(rt: Arc<Runtime>, checker: Arc<Checker>) {
    let mut shutdown = rt.shutdown_subscribe();
    let mut interval = tokio::time::interval(STATUS_PERIOD);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => checker.log_status(),
            changed = shutdown.changed() => {
                if changed.is_err() || rt.is_shutdown() {
                    break;
                }
            }
        }
    }
}
