//! Local execution: timeouts, failures, event handlers

mod common;

use async_trait::async_trait;
use common::{feed, sim_runtime};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vigil_engine::command::{FnCheckCommand, FnEventCommand, SelfCheckCommand};
use vigil_engine::{
    executor, CheckCommand, Checkable, CheckableConfig, CheckResult, Clock, EngineError,
    EngineResult, Runtime, ServiceState,
};

struct SleepyCommand;

#[async_trait]
impl CheckCommand for SleepyCommand {
    fn name(&self) -> &str {
        "sleepy"
    }

    fn timeout(&self) -> f64 {
        1.0
    }

    async fn execute(
        &self,
        _rt: &Runtime,
        _checkable: &Checkable,
        cr: &mut CheckResult,
        _resolved_macros: Option<&serde_json::Value>,
    ) -> EngineResult<()> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        cr.state = ServiceState::Ok;
        Ok(())
    }
}

fn host_with_command(rt: &Arc<Runtime>, command: &str) -> Arc<Checkable> {
    rt.register_host("web", CheckableConfig {
        check_command: command.into(),
        check_interval: 60.0,
        max_check_attempts: 1,
        ..CheckableConfig::default()
    })
    .unwrap()
}

/// A missing check command produces an Unknown result, not an error
#[tokio::test]
async fn missing_command_becomes_unknown() {
    let (rt, _clock) = sim_runtime();
    let host = host_with_command(&rt, "ghost");

    executor::execute_check(&rt, &host).await.unwrap();

    let cr = host.last_check_result().unwrap();
    assert_eq!(cr.state, ServiceState::Unknown);
    assert!(cr.output.contains("ghost"));
}

/// A command returning an error is converted to Unknown with diagnostics
#[tokio::test]
async fn failing_command_becomes_unknown() {
    let (rt, _clock) = sim_runtime();
    rt.register_check_command(Arc::new(FnCheckCommand::new("broken", 60.0, |_, _| {
        Err(EngineError::CheckExecution("exploded".into()))
    })));

    let host = host_with_command(&rt, "broken");
    executor::execute_check(&rt, &host).await.unwrap();

    let cr = host.last_check_result().unwrap();
    assert_eq!(cr.state, ServiceState::Unknown);
    assert!(cr.output.contains("exploded"));
}

/// Timeouts surface as Unknown with a timeout diagnostic
#[tokio::test(start_paused = true)]
async fn timed_out_command_becomes_unknown() {
    let (rt, _clock) = sim_runtime();
    rt.register_check_command(Arc::new(SleepyCommand));

    let host = host_with_command(&rt, "sleepy");
    executor::execute_check(&rt, &host).await.unwrap();

    let cr = host.last_check_result().unwrap();
    assert_eq!(cr.state, ServiceState::Unknown);
    assert!(cr.output.contains("timed out"));
}

/// The per-checkable timeout override beats the command default
#[tokio::test(start_paused = true)]
async fn checkable_timeout_override_applies() {
    let (rt, _clock) = sim_runtime();
    rt.register_check_command(Arc::new(SleepyCommand));

    let host = rt
        .register_host("web", CheckableConfig {
            check_command: "sleepy".into(),
            check_interval: 60.0,
            max_check_attempts: 1,
            check_timeout: Some(0.5),
            ..CheckableConfig::default()
        })
        .unwrap();

    executor::execute_check(&rt, &host).await.unwrap();

    let cr = host.last_check_result().unwrap();
    assert!(cr.output.contains("0.5 seconds"));
}

/// An execution in flight blocks a second one
#[tokio::test]
async fn overlapping_execution_is_skipped() {
    struct ParkedCommand {
        runs: Arc<AtomicUsize>,
        release: Arc<tokio::sync::Semaphore>,
    }

    #[async_trait]
    impl CheckCommand for ParkedCommand {
        fn name(&self) -> &str {
            "parked"
        }

        async fn execute(
            &self,
            _rt: &Runtime,
            _checkable: &Checkable,
            cr: &mut CheckResult,
            _resolved_macros: Option<&serde_json::Value>,
        ) -> EngineResult<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            let _permit = self.release.acquire().await;
            cr.state = ServiceState::Ok;
            Ok(())
        }
    }

    let (rt, _clock) = sim_runtime();
    let runs = Arc::new(AtomicUsize::new(0));
    let release = Arc::new(tokio::sync::Semaphore::new(0));

    rt.register_check_command(Arc::new(ParkedCommand {
        runs: runs.clone(),
        release: release.clone(),
    }));

    let host = host_with_command(&rt, "parked");

    let first = {
        let rt = rt.clone();
        let host = host.clone();
        tokio::spawn(async move { executor::execute_check(&rt, &host).await })
    };

    // wait for the first execution to park inside the command
    while runs.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(host.is_check_running());

    // the overlapping call returns without running the command again
    executor::execute_check(&rt, &host).await.unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    release.add_permits(1);
    first.await.unwrap().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(!host.is_check_running());
}

/// The built-in self check reports runtime statistics
#[tokio::test]
async fn self_check_reports_runtime_stats() {
    let (rt, _clock) = sim_runtime();
    rt.register_check_command(Arc::new(SelfCheckCommand));

    let host = host_with_command(&rt, "vigil");
    executor::execute_check(&rt, &host).await.unwrap();

    let cr = host.last_check_result().unwrap();
    assert_eq!(cr.state, ServiceState::Ok);
    assert!(cr.output.starts_with("Vigil OK"));

    let labels: Vec<&str> = cr
        .performance_data
        .iter()
        .map(|pd| pd.label.as_str())
        .collect();
    assert!(labels.contains(&"uptime"));
    assert!(labels.contains(&"num_hosts"));
    assert!(labels.contains(&"active_checks_1min"));
}

/// Check statistics count processed results
#[tokio::test]
async fn check_stats_count_results() {
    let (rt, clock) = sim_runtime();
    let host = rt.register_host("web", common::config(1)).unwrap();

    feed(&rt, &clock, &host, ServiceState::Ok).await;
    feed(&rt, &clock, &host, ServiceState::Ok).await;

    assert_eq!(rt.stats.active_checks(clock.now(), 300), 2);
    assert_eq!(rt.stats.passive_checks(clock.now(), 300), 0);
}

/// Event handlers run on qualifying transitions and emit their signal
#[tokio::test]
async fn event_handler_runs_on_transitions() {
    let (rt, clock) = sim_runtime();
    let runs: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let sink = runs.clone();
    rt.register_event_command(Arc::new(FnEventCommand::new("restart", move |checkable| {
        sink.lock().push(checkable.name().to_string());
        Ok(())
    })));

    let executed = Arc::new(AtomicUsize::new(0));
    let counter = executed.clone();
    let _guard = rt
        .signals
        .on_event_command_executed
        .connect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    let host = rt
        .register_host("web", CheckableConfig {
            check_command: "noop".into(),
            event_command: Some("restart".into()),
            check_interval: 60.0,
            max_check_attempts: 2,
            ..CheckableConfig::default()
        })
        .unwrap();

    feed(&rt, &clock, &host, ServiceState::Ok).await;
    runs.lock().clear();
    executed.store(0, Ordering::SeqCst);

    // soft failure, hard failure, recovery: three qualifying transitions
    feed(&rt, &clock, &host, ServiceState::Critical).await;
    feed(&rt, &clock, &host, ServiceState::Critical).await;
    feed(&rt, &clock, &host, ServiceState::Ok).await;

    assert_eq!(runs.lock().len(), 3);
    assert_eq!(executed.load(Ordering::SeqCst), 3);

    // steady state runs nothing
    feed(&rt, &clock, &host, ServiceState::Ok).await;
    assert_eq!(runs.lock().len(), 3);
}

/// Disabling event handlers gates execution
#[tokio::test]
async fn event_handler_toggles_gate_execution() {
    let (rt, clock) = sim_runtime();
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = runs.clone();
    rt.register_event_command(Arc::new(FnEventCommand::new("restart", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })));

    let host = rt
        .register_host("web", CheckableConfig {
            check_command: "noop".into(),
            event_command: Some("restart".into()),
            check_interval: 60.0,
            max_check_attempts: 1,
            ..CheckableConfig::default()
        })
        .unwrap();

    feed(&rt, &clock, &host, ServiceState::Ok).await;
    runs.store(0, Ordering::SeqCst);

    rt.flags.set_event_handlers_enabled(false);
    feed(&rt, &clock, &host, ServiceState::Critical).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    rt.flags.set_event_handlers_enabled(true);
    host.set_event_handler_enabled(false);
    feed(&rt, &clock, &host, ServiceState::Ok).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    host.set_event_handler_enabled(true);
    feed(&rt, &clock, &host, ServiceState::Critical).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
