//! Flapping detection end-to-end

mod common;

use common::{feed, sim_runtime, NotificationLog};
use std::sync::Arc;
use vigil_engine::{CheckableConfig, NotificationType, Runtime, ServiceState, SimClock};

async fn flapping_service(
    rt: &Arc<Runtime>,
    clock: &Arc<SimClock>,
    low: f64,
    high: f64,
) -> Arc<vigil_engine::Checkable> {
    rt.register_host("web", common::config(1)).unwrap();
    let service = rt
        .register_service("web", "disk", CheckableConfig {
            check_command: "noop".into(),
            check_interval: 60.0,
            max_check_attempts: 1,
            flapping_threshold_low: low,
            flapping_threshold_high: high,
            enable_flapping: true,
            ..CheckableConfig::default()
        })
        .unwrap();

    let host = rt.checkable("web").unwrap();
    feed(rt, clock, &host, ServiceState::Ok).await;
    feed(rt, clock, &service, ServiceState::Ok).await;

    service
}

/// Ten alternating results push the detector over a 50% threshold once;
/// twenty quiet results bring it back under 25% once.
#[tokio::test]
async fn flapping_start_and_end_fire_once() {
    let (rt, clock) = sim_runtime();
    let log = NotificationLog::attach(&rt);
    let service = flapping_service(&rt, &clock, 25.0, 50.0).await;
    log.take();

    for i in 0..10 {
        let state = if i % 2 == 0 {
            ServiceState::Critical
        } else {
            ServiceState::Ok
        };
        feed(&rt, &clock, &service, state).await;
    }

    assert!(service.is_flapping(&rt));
    assert_eq!(log.count_of(NotificationType::FlappingStart), 1);

    log.take();

    for _ in 0..20 {
        feed(&rt, &clock, &service, ServiceState::Ok).await;
    }

    assert!(!service.is_flapping(&rt));
    assert_eq!(log.count_of(NotificationType::FlappingEnd), 1);
    // no Problem/Recovery slipped out while the detector was latched
    assert_eq!(log.count_of(NotificationType::Problem), 0);
}

/// Notifications are suppressed while flapping
#[tokio::test]
async fn flapping_suppresses_problem_notifications() {
    let (rt, clock) = sim_runtime();
    let log = NotificationLog::attach(&rt);
    let service = flapping_service(&rt, &clock, 25.0, 50.0).await;

    for i in 0..10 {
        let state = if i % 2 == 0 {
            ServiceState::Critical
        } else {
            ServiceState::Ok
        };
        feed(&rt, &clock, &service, state).await;
    }

    assert!(service.is_flapping(&rt));
    log.take();

    // hard state changes while flapping stay quiet
    feed(&rt, &clock, &service, ServiceState::Critical).await;
    feed(&rt, &clock, &service, ServiceState::Ok).await;

    let types = log.types();
    assert!(!types.contains(&NotificationType::Problem));
    assert!(!types.contains(&NotificationType::Recovery));
}

/// A checkable that stops flapping while still hard-problem gets the
/// deferred Problem replayed after FlappingEnd.
#[tokio::test]
async fn flapping_end_replays_problem() {
    let (rt, clock) = sim_runtime();
    let log = NotificationLog::attach(&rt);
    // high threshold tuned so flapping starts on the seventh change,
    // which is a Critical result
    let service = flapping_service(&rt, &clock, 25.0, 35.0).await;
    log.take();

    // each result is a raw state change and every state is a problem
    for state in [
        ServiceState::Critical,
        ServiceState::Unknown,
        ServiceState::Critical,
        ServiceState::Unknown,
        ServiceState::Critical,
        ServiceState::Unknown,
        ServiceState::Critical,
    ] {
        feed(&rt, &clock, &service, state).await;
    }

    assert!(service.is_flapping(&rt));
    log.take();

    // constant Critical until the detector drains
    let mut rounds = 0;
    while service.is_flapping(&rt) {
        feed(&rt, &clock, &service, ServiceState::Critical).await;
        rounds += 1;
        assert!(rounds < 40, "flapping never ended");
    }

    assert_eq!(service.state_raw(), ServiceState::Critical);
    assert_eq!(log.count_of(NotificationType::FlappingEnd), 1);
    assert_eq!(log.count_of(NotificationType::Problem), 1);
}

/// The oscillation percentage never leaves [0, 100]
#[tokio::test]
async fn flapping_percentage_bounds() {
    let (rt, clock) = sim_runtime();
    let service = flapping_service(&rt, &clock, 25.0, 50.0).await;

    for i in 0..60 {
        let state = if i % 3 == 0 {
            ServiceState::Critical
        } else {
            ServiceState::Ok
        };
        feed(&rt, &clock, &service, state).await;

        let current = service.flapping_current();
        assert!((0.0..=100.0).contains(&current));
    }
}

/// Disabling flapping per checkable hides the stored flag
#[tokio::test]
async fn flapping_gates_respect_toggles() {
    let (rt, clock) = sim_runtime();
    let service = flapping_service(&rt, &clock, 25.0, 50.0).await;

    for i in 0..10 {
        let state = if i % 2 == 0 {
            ServiceState::Critical
        } else {
            ServiceState::Ok
        };
        feed(&rt, &clock, &service, state).await;
    }

    assert!(service.is_flapping(&rt));

    service.set_flapping_enabled(false);
    assert!(!service.is_flapping(&rt));

    service.set_flapping_enabled(true);
    rt.flags.set_flapping_enabled(false);
    assert!(!service.is_flapping(&rt));

    rt.flags.set_flapping_enabled(true);
    assert!(service.is_flapping(&rt));
}
