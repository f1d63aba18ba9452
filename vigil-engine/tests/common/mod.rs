//! Shared fixtures for the integration suite

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use vigil_engine::{
    Checkable, CheckableConfig, CheckResult, Clock, NotificationType, Origin, Runtime,
    ServiceState, SignalGuard, SimClock, StateType,
};

pub const T0: f64 = 1_700_000_000.0;

/// A runtime on a simulated clock
pub fn sim_runtime() -> (Arc<Runtime>, Arc<SimClock>) {
    let clock = Arc::new(SimClock::new(T0));
    let rt = Runtime::new("node-a", clock.clone());
    (rt, clock)
}

/// A checkable config with `max_check_attempts` attempts
pub fn config(max_check_attempts: u32) -> CheckableConfig {
    CheckableConfig {
        check_command: "noop".into(),
        check_interval: 60.0,
        retry_interval: Some(30.0),
        max_check_attempts,
        ..CheckableConfig::default()
    }
}

/// A fully stamped check result at `now`
pub fn result_at(state: ServiceState, now: f64) -> CheckResult {
    let mut cr = CheckResult::new(state, state.as_str());
    cr.schedule_start = now;
    cr.schedule_end = now;
    cr.execution_start = now;
    cr.execution_end = now;
    cr
}

/// Advance the clock one minute and process a result
pub async fn feed(
    rt: &Arc<Runtime>,
    clock: &Arc<SimClock>,
    checkable: &Arc<Checkable>,
    state: ServiceState,
) {
    clock.advance(60.0);
    checkable
        .process_check_result(rt, result_at(state, clock.now()), Origin::Local)
        .await
        .unwrap();
}

/// Captures every notification request
pub struct NotificationLog {
    entries: Arc<Mutex<Vec<(String, NotificationType)>>>,
    _guard: SignalGuard,
}

impl NotificationLog {
    pub fn attach(rt: &Runtime) -> Self {
        let entries: Arc<Mutex<Vec<(String, NotificationType)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = entries.clone();

        let guard = rt.signals.on_notifications_requested.connect(move |req| {
            sink.lock()
                .push((req.checkable.name().to_string(), req.notification_type));
        });

        Self {
            entries,
            _guard: guard,
        }
    }

    /// Drain and return everything captured so far
    pub fn take(&self) -> Vec<(String, NotificationType)> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn types(&self) -> Vec<NotificationType> {
        self.entries.lock().iter().map(|(_, ty)| *ty).collect()
    }

    pub fn count_of(&self, ty: NotificationType) -> usize {
        self.entries.lock().iter().filter(|(_, t)| *t == ty).count()
    }
}

/// Counts state-change signal emissions by type
pub struct StateChangeLog {
    entries: Arc<Mutex<Vec<StateType>>>,
    _guard: SignalGuard,
}

impl StateChangeLog {
    pub fn attach(rt: &Runtime) -> Self {
        let entries: Arc<Mutex<Vec<StateType>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = entries.clone();

        let guard = rt
            .signals
            .on_state_change
            .connect(move |event| sink.lock().push(event.state_type));

        Self {
            entries,
            _guard: guard,
        }
    }

    pub fn take(&self) -> Vec<StateType> {
        std::mem::take(&mut *self.entries.lock())
    }
}

/// Register a host and a service and drive both to a hard OK baseline
pub async fn host_and_service(
    rt: &Arc<Runtime>,
    clock: &Arc<SimClock>,
    max_check_attempts: u32,
) -> (Arc<Checkable>, Arc<Checkable>) {
    let host = rt.register_host("web", config(1)).unwrap();
    let service = rt
        .register_service("web", "disk", config(max_check_attempts))
        .unwrap();

    feed(rt, clock, &host, ServiceState::Ok).await;
    feed(rt, clock, &service, ServiceState::Ok).await;

    assert_eq!(service.state_type(), StateType::Hard);
    assert!(service.state_raw().is_ok());

    (host, service)
}
