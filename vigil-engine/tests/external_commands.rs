//! External command surface

mod common;

use common::{feed, host_and_service, sim_runtime, NotificationLog};
use vigil_engine::external_command::process_external_command;
use vigil_engine::{Clock, EngineError, NotificationType, ServiceState, StateType};

#[tokio::test]
async fn passive_service_result_is_processed() {
    let (rt, clock) = sim_runtime();
    let (_host, service) = host_and_service(&rt, &clock, 1).await;

    clock.advance(60.0);
    process_external_command(
        &rt,
        "[1700000000] PROCESS_SERVICE_CHECK_RESULT;web;disk;1;WARN - almost full | used=91%;90;95",
    )
    .await
    .unwrap();

    assert_eq!(service.state_raw(), ServiceState::Warning);
    assert_eq!(service.state_type(), StateType::Hard);

    let cr = service.last_check_result().unwrap();
    assert!(!cr.active);
    assert_eq!(cr.output, "WARN - almost full");
    assert_eq!(cr.performance_data.len(), 1);
    assert_eq!(cr.performance_data[0].label, "used");
    assert_eq!(cr.performance_data[0].crit, Some(95.0));
}

#[tokio::test]
async fn passive_results_respect_the_toggle() {
    let (rt, clock) = sim_runtime();
    let (_host, service) = host_and_service(&rt, &clock, 1).await;

    service.set_passive_checks_enabled(false);

    clock.advance(60.0);
    process_external_command(&rt, "PROCESS_SERVICE_CHECK_RESULT;web;disk;2;broken")
        .await
        .unwrap();

    assert!(service.state_raw().is_ok());
}

#[tokio::test]
async fn passive_host_result_maps_codes() {
    let (rt, clock) = sim_runtime();
    let (host, _service) = host_and_service(&rt, &clock, 1).await;

    clock.advance(60.0);
    process_external_command(&rt, "PROCESS_HOST_CHECK_RESULT;web;1;unreachable")
        .await
        .unwrap();

    assert_eq!(host.host_state(), vigil_engine::HostState::Down);
}

#[tokio::test]
async fn acknowledge_and_remove_via_commands() {
    let (rt, clock) = sim_runtime();
    let log = NotificationLog::attach(&rt);
    let (_host, service) = host_and_service(&rt, &clock, 1).await;

    // acknowledging a healthy object is refused
    let err = process_external_command(&rt, "ACKNOWLEDGE_SVC_PROBLEM;web;disk;2;1;0;ops;known")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExternalCommand(_)));

    feed(&rt, &clock, &service, ServiceState::Critical).await;
    log.take();

    process_external_command(&rt, "ACKNOWLEDGE_SVC_PROBLEM;web;disk;2;1;0;ops;known issue")
        .await
        .unwrap();

    assert!(service.is_acknowledged(&rt));
    assert_eq!(log.count_of(NotificationType::Acknowledgement), 1);
    assert_eq!(service.comment_names().len(), 1);

    process_external_command(&rt, "REMOVE_SVC_ACKNOWLEDGEMENT;web;disk")
        .await
        .unwrap();

    assert!(!service.is_acknowledged(&rt));
    assert!(service.comment_names().is_empty());
}

#[tokio::test]
async fn ack_with_expiry_parses_the_extra_field() {
    let (rt, clock) = sim_runtime();
    let (_host, service) = host_and_service(&rt, &clock, 1).await;

    feed(&rt, &clock, &service, ServiceState::Critical).await;

    let expiry = clock.now() + 120.0;
    process_external_command(
        &rt,
        &format!("ACKNOWLEDGE_SVC_PROBLEM_EXPIRE;web;disk;1;0;0;{expiry};ops;short"),
    )
    .await
    .unwrap();

    assert!(service.is_acknowledged(&rt));

    clock.advance(121.0);
    assert!(!service.is_acknowledged(&rt));
}

#[tokio::test]
async fn schedule_and_delete_downtime_via_commands() {
    let (rt, clock) = sim_runtime();
    let (_host, service) = host_and_service(&rt, &clock, 1).await;

    let start = clock.now() - 60.0;
    let end = clock.now() + 3600.0;
    process_external_command(
        &rt,
        &format!("SCHEDULE_SVC_DOWNTIME;web;disk;{start};{end};1;0;0;ops;window"),
    )
    .await
    .unwrap();

    assert!(service.is_in_downtime(&rt));

    let downtime = rt
        .downtimes_snapshot()
        .into_iter()
        .find(|d| d.checkable_name() == "web!disk")
        .unwrap();

    process_external_command(&rt, &format!("DEL_SVC_DOWNTIME;{}", downtime.legacy_id))
        .await
        .unwrap();

    assert!(!service.is_in_downtime(&rt));
}

#[tokio::test]
async fn forced_check_command_sets_the_flag() {
    let (rt, clock) = sim_runtime();
    let (host, service) = host_and_service(&rt, &clock, 1).await;

    process_external_command(&rt, "SCHEDULE_FORCED_HOST_CHECK;web;1700000000")
        .await
        .unwrap();
    assert!(host.force_next_check_flag());
    assert_eq!(host.next_check(), rt.now());

    process_external_command(&rt, "SCHEDULE_FORCED_SVC_CHECK;web;disk;1700000000")
        .await
        .unwrap();
    assert!(service.force_next_check_flag());
}

#[tokio::test]
async fn check_toggles_flip_flags() {
    let (rt, clock) = sim_runtime();
    let (host, service) = host_and_service(&rt, &clock, 1).await;

    process_external_command(&rt, "DISABLE_HOST_CHECK;web")
        .await
        .unwrap();
    assert!(!host.active_checks_enabled());

    process_external_command(&rt, "ENABLE_HOST_CHECK;web")
        .await
        .unwrap();
    assert!(host.active_checks_enabled());

    process_external_command(&rt, "DISABLE_SVC_CHECK;web;disk")
        .await
        .unwrap();
    assert!(!service.active_checks_enabled());

    process_external_command(&rt, "DISABLE_NOTIFICATIONS")
        .await
        .unwrap();
    assert!(!rt.flags.notifications_enabled());

    process_external_command(&rt, "ENABLE_NOTIFICATIONS")
        .await
        .unwrap();
    assert!(rt.flags.notifications_enabled());
}

#[tokio::test]
async fn malformed_commands_are_typed_errors() {
    let (rt, clock) = sim_runtime();
    host_and_service(&rt, &clock, 1).await;

    let unknown = process_external_command(&rt, "FROBNICATE_ALL_THE_THINGS")
        .await
        .unwrap_err();
    assert!(unknown.to_string().contains("FROBNICATE_ALL_THE_THINGS"));

    let missing = process_external_command(&rt, "SCHEDULE_FORCED_HOST_CHECK")
        .await
        .unwrap_err();
    assert!(missing.to_string().contains("SCHEDULE_FORCED_HOST_CHECK"));

    let bad_host = process_external_command(&rt, "SCHEDULE_FORCED_HOST_CHECK;nope;0")
        .await
        .unwrap_err();
    assert!(bad_host.to_string().contains("nope"));

    let unterminated = process_external_command(&rt, "[12345 SCHEDULE_FORCED_HOST_CHECK;web;0")
        .await
        .unwrap_err();
    assert!(matches!(unterminated, EngineError::ExternalCommand(_)));
}
