//! Check executor
//!
//! Produces a `CheckResult` for one checkable: locally by running its
//! check command under a timeout, or by dispatching the check to a remote
//! endpoint and letting the reply re-enter the result processor. A 60 s
//! sweep force-completes checks whose agent stopped responding.

use crate::check_result::CheckResult;
use crate::checkable::Checkable;
use crate::command::DEFAULT_COMMAND_TIMEOUT;
use crate::error::EngineResult;
use crate::remote;
use crate::runtime::Runtime;
use crate::types::{Origin, ServiceState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Grace period added to the command timeout before a remote check is
/// eligible for re-dispatch
const REMOTE_REPLY_GRACE: f64 = 30.0;

/// Remote results outstanding for longer than this are handed to the
/// stale-agent check
const PENDING_REMOTE_HORIZON: f64 = 60.0;

/// An endpoint silent for longer than this is considered dead
const AGENT_SILENCE_HORIZON: f64 = 300.0;

/// Dispatch deferral window after process start while endpoints connect
const STARTUP_GRACE: f64 = 300.0;

/// Execute one check for `checkable`, locally or remotely
pub async fn execute_check(rt: &Arc<Runtime>, checkable: &Arc<Checkable>) -> EngineResult<()> {
    let scheduled_start = checkable.next_check();
    let before_check = rt.now();

    checkable.update_next_check(rt);

    {
        let mut st = checkable.state.lock();

        // don't run another check while one is pending
        if st.check_running {
            return Ok(());
        }
        st.check_running = true;

        st.last_state_raw = st.state_raw;
        st.last_state_type = st.state_type;
    }

    let mut cr = CheckResult::new(ServiceState::Unknown, "");
    cr.schedule_start = scheduled_start;
    cr.execution_start = before_check;
    cr.active = true;
    cr.command = checkable.config().check_command.clone();

    let remote_endpoint = checkable
        .config()
        .command_endpoint
        .as_ref()
        .and_then(|name| rt.endpoint(name))
        .filter(|endpoint| !endpoint.is_local());

    let Some(endpoint) = remote_endpoint else {
        run_local_check(rt, checkable, &mut cr).await;

        if cr.execution_end == 0.0 {
            cr.execution_end = rt.now();
        }
        cr.schedule_end = rt.now();

        return checkable.process_check_result(rt, cr, Origin::Local).await;
    };

    if endpoint.is_connected() {
        let message = remote::execute_command_message(checkable, json!({}));
        rt.send_message(endpoint.name(), message)?;

        // hold off re-dispatch until the reply window closes
        let timeout = command_timeout(rt, checkable);
        checkable.set_next_check(rt, rt.now() + timeout + REMOTE_REPLY_GRACE);
        rt.mark_pending_remote(checkable.name(), rt.now());

        checkable.state.lock().check_running = false;

        tracing::debug!(
            target: "vigil_engine::executor",
            checkable = %checkable.name(),
            endpoint = %endpoint.name(),
            "dispatched check to remote endpoint"
        );

        Ok(())
    } else if !endpoint.is_syncing() && rt.uptime() > STARTUP_GRACE {
        cr.state = ServiceState::Unknown;
        cr.output = format!(
            "Remote Vigil instance '{}' is not connected to '{}'",
            endpoint.name(),
            rt.node_name()
        );
        cr.execution_end = rt.now();
        cr.schedule_end = rt.now();

        checkable.process_check_result(rt, cr, Origin::Local).await
    } else {
        // endpoint still settling after startup or sync; silently defer
        checkable.state.lock().check_running = false;
        Ok(())
    }
}

async fn run_local_check(rt: &Arc<Runtime>, checkable: &Arc<Checkable>, cr: &mut CheckResult) {
    let command_name = checkable.config().check_command.clone();

    let Some(command) = rt.check_command(&command_name) else {
        cr.state = ServiceState::Unknown;
        cr.output = format!("Check command '{}' does not exist", command_name);
        return;
    };

    let timeout = command_timeout(rt, checkable);

    match tokio::time::timeout(
        Duration::from_secs_f64(timeout.max(0.001)),
        command.execute(rt, checkable, cr, None),
    )
    .await
    {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            cr.state = ServiceState::Unknown;
            cr.output = format!("Check command '{}' failed: {}", command_name, err);
        }
        Err(_) => {
            cr.state = ServiceState::Unknown;
            cr.output = format!(
                "Check command '{}' timed out after {} seconds",
                command_name, timeout
            );
        }
    }
}

fn command_timeout(rt: &Runtime, checkable: &Checkable) -> f64 {
    if let Some(timeout) = checkable.config().check_timeout {
        return timeout;
    }

    rt.check_command(&checkable.config().check_command)
        .map(|command| command.timeout())
        .unwrap_or(DEFAULT_COMMAND_TIMEOUT)
}

/// 60 s sweep: any checkable whose remote dispatch is older than a minute
/// and whose agent has been silent for five gets a synthetic Critical.
pub async fn sweep_stale_agents(rt: &Arc<Runtime>) {
    let now = rt.now();
    let stale = rt.pending_remote_older_than(now - PENDING_REMOTE_HORIZON);

    for name in stale {
        let Some(checkable) = rt.checkable(&name) else {
            rt.clear_pending_remote(&name);
            continue;
        };

        let endpoint = checkable
            .config()
            .command_endpoint
            .as_ref()
            .and_then(|ep| rt.endpoint(ep));

        let Some(endpoint) = endpoint else {
            rt.clear_pending_remote(&name);
            continue;
        };

        if endpoint.last_seen() >= now - AGENT_SILENCE_HORIZON {
            // agent is alive, keep waiting for the reply
            continue;
        }

        tracing::warn!(
            target: "vigil_engine::executor",
            checkable = %name,
            endpoint = %endpoint.name(),
            "agent stopped responding, force-completing check"
        );

        let cr = CheckResult::new(ServiceState::Critical, "Agent isn't responding.");

        if let Err(err) = checkable.process_check_result(rt, cr, Origin::Local).await {
            tracing::warn!(
                target: "vigil_engine::executor",
                checkable = %name,
                error = %err,
                "failed to process synthetic agent result"
            );
        }
    }
}
