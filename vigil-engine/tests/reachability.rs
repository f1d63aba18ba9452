//! Dependency graph and reachability

mod common;

use common::{feed, host_and_service, result_at, sim_runtime};
use parking_lot::Mutex;
use std::sync::Arc;
use vigil_engine::{
    Clock, Dependency, DependencyType, NotificationType, Origin, ServiceState, SignalGuard,
};

fn state_dep(name: &str, parent: &str, child: &str) -> Dependency {
    Dependency {
        name: name.into(),
        parent: parent.into(),
        child: child.into(),
        dependency_type: DependencyType::State,
        period: None,
        ignore_soft_states: false,
        state_filter: None,
    }
}

/// The implicit host dependency: hard-Down cuts services off, soft-Down
/// does not.
#[tokio::test]
async fn service_reachability_follows_host_hardness() {
    let (rt, clock) = sim_runtime();

    let host = rt.register_host("web", common::config(2)).unwrap();
    let service = rt
        .register_service("web", "disk", common::config(1))
        .unwrap();

    feed(&rt, &clock, &host, ServiceState::Ok).await;
    assert!(service.is_reachable(&rt, DependencyType::State));
    assert!(service.is_reachable(&rt, DependencyType::Notification));

    // first failure: host soft-Down, service still reachable
    feed(&rt, &clock, &host, ServiceState::Critical).await;
    assert_eq!(host.state_type(), vigil_engine::StateType::Soft);
    assert!(service.is_reachable(&rt, DependencyType::State));

    // second failure: hard-Down, service unreachable for state and
    // notifications but not for check execution
    feed(&rt, &clock, &host, ServiceState::Critical).await;
    assert_eq!(host.state_type(), vigil_engine::StateType::Hard);
    assert!(!service.is_reachable(&rt, DependencyType::State));
    assert!(!service.is_reachable(&rt, DependencyType::Notification));
    assert!(service.is_reachable(&rt, DependencyType::CheckExecution));
}

/// An explicit dependency makes the child unreachable while the parent
/// is in a problem state.
#[tokio::test]
async fn explicit_dependency_gates_reachability() {
    let (rt, clock) = sim_runtime();

    let gateway = rt.register_host("gateway", common::config(1)).unwrap();
    let server = rt.register_host("server", common::config(1)).unwrap();

    rt.register_dependency(state_dep("server-via-gateway", "gateway", "server"))
        .unwrap();

    feed(&rt, &clock, &gateway, ServiceState::Ok).await;
    feed(&rt, &clock, &server, ServiceState::Ok).await;
    assert!(server.is_reachable(&rt, DependencyType::State));

    feed(&rt, &clock, &gateway, ServiceState::Critical).await;
    assert!(!server.is_reachable(&rt, DependencyType::State));

    // the dependency type is respected: a State edge does not gate
    // Notification reachability
    assert!(server.is_reachable(&rt, DependencyType::Notification));

    feed(&rt, &clock, &gateway, ServiceState::Ok).await;
    assert!(server.is_reachable(&rt, DependencyType::State));
}

/// An unreachable result stamps last_reachable and the unreachable
/// timestamp.
#[tokio::test]
async fn unreachable_state_is_recorded() {
    let (rt, clock) = sim_runtime();

    let gateway = rt.register_host("gateway", common::config(1)).unwrap();
    let server = rt.register_host("server", common::config(1)).unwrap();
    rt.register_dependency(state_dep("edge", "gateway", "server"))
        .unwrap();

    feed(&rt, &clock, &gateway, ServiceState::Critical).await;
    feed(&rt, &clock, &server, ServiceState::Critical).await;

    assert!(!server.last_reachable());
}

/// A dependency cycle terminates at the recursion bound instead of
/// hanging.
#[tokio::test]
async fn dependency_cycles_terminate() {
    let (rt, clock) = sim_runtime();

    let a = rt.register_host("a", common::config(1)).unwrap();
    let b = rt.register_host("b", common::config(1)).unwrap();

    rt.register_dependency(state_dep("a-on-b", "b", "a")).unwrap();
    rt.register_dependency(state_dep("b-on-a", "a", "b")).unwrap();

    feed(&rt, &clock, &a, ServiceState::Ok).await;
    feed(&rt, &clock, &b, ServiceState::Ok).await;

    // the bound turns the cycle into "unreachable" rather than a hang
    assert!(!a.is_reachable(&rt, DependencyType::State));
    assert!(!b.is_reachable(&rt, DependencyType::State));
}

/// A child's state change reschedules its direct parents immediately
#[tokio::test]
async fn state_change_reschedules_parents() {
    let (rt, clock) = sim_runtime();

    let gateway = rt.register_host("gateway", common::config(1)).unwrap();
    let server = rt.register_host("server", common::config(1)).unwrap();
    rt.register_dependency(state_dep("edge", "gateway", "server"))
        .unwrap();

    feed(&rt, &clock, &gateway, ServiceState::Ok).await;
    feed(&rt, &clock, &server, ServiceState::Ok).await;

    gateway.set_next_check(&rt, rt.now() + 3600.0);

    feed(&rt, &clock, &server, ServiceState::Critical).await;

    assert_eq!(gateway.next_check(), rt.now());
}

/// Reachability flips emit OnReachabilityChanged with the children
#[tokio::test]
async fn reachability_change_event_lists_children() {
    let (rt, clock) = sim_runtime();

    let affected: Arc<Mutex<Vec<Vec<String>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = affected.clone();
    let _guard: SignalGuard = rt.signals.on_reachability_changed.connect(move |event| {
        sink.lock().push(
            event
                .children
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
        );
    });

    let gateway = rt.register_host("gateway", common::config(1)).unwrap();
    let server = rt.register_host("server", common::config(1)).unwrap();
    rt.register_dependency(state_dep("edge", "gateway", "server"))
        .unwrap();

    feed(&rt, &clock, &gateway, ServiceState::Ok).await;
    affected.lock().clear();

    feed(&rt, &clock, &gateway, ServiceState::Critical).await;

    let events = affected.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0], vec!["server".to_string()]);
}

/// Suppressed notifications when unreachable: no Problem while the
/// parent path is down.
#[tokio::test]
async fn unreachable_children_stay_quiet() {
    let (rt, clock) = sim_runtime();
    let log = common::NotificationLog::attach(&rt);
    let (host, service) = host_and_service(&rt, &clock, 1).await;
    log.take();

    // hard-Down host
    feed(&rt, &clock, &host, ServiceState::Critical).await;
    log.take();

    feed(&rt, &clock, &service, ServiceState::Critical).await;

    assert_eq!(log.count_of(NotificationType::Problem), 0);
}

/// Transitive child enumeration is bounded and deduplicated
#[tokio::test]
async fn all_children_walks_the_graph() {
    let (rt, clock) = sim_runtime();

    let root = rt.register_host("root", common::config(1)).unwrap();
    let mid = rt.register_host("mid", common::config(1)).unwrap();
    let leaf_a = rt.register_host("leaf-a", common::config(1)).unwrap();
    let leaf_b = rt.register_host("leaf-b", common::config(1)).unwrap();

    rt.register_dependency(state_dep("d1", "root", "mid")).unwrap();
    rt.register_dependency(state_dep("d2", "mid", "leaf-a")).unwrap();
    rt.register_dependency(state_dep("d3", "mid", "leaf-b")).unwrap();
    // diamond edge back to leaf-a must not duplicate it
    rt.register_dependency(state_dep("d4", "root", "leaf-a")).unwrap();

    feed(&rt, &clock, &root, ServiceState::Ok).await;

    let names: Vec<String> = root
        .all_children(&rt)
        .iter()
        .map(|c| c.name().to_string())
        .collect();

    assert_eq!(names, vec!["leaf-a", "leaf-b", "mid"]);

    drop((mid, leaf_a, leaf_b));
}

/// Processing a result for an unknown reason never panics the caller:
/// results with an unregistered origin endpoint are still fine.
#[tokio::test]
async fn processing_with_remote_origin_is_ok() {
    let (rt, clock) = sim_runtime();
    let (_host, service) = host_and_service(&rt, &clock, 1).await;

    clock.advance(60.0);
    service
        .process_check_result(
            &rt,
            result_at(ServiceState::Ok, clock.now()),
            Origin::Remote("elsewhere".into()),
        )
        .await
        .unwrap();

    assert!(service.state_raw().is_ok());
}
