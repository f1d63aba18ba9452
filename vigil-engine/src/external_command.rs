//! External command surface
//!
//! The classic text protocol: `[<timestamp>] COMMAND;arg;arg;...`.
//! Commands mutate runtime state (forced checks, acknowledgements,
//! downtimes, passive results, toggles); malformed input yields a typed
//! error naming the verb.

use crate::checkable::Checkable;
use crate::check_result::CheckResult;
use crate::command::split_plugin_output;
use crate::comment;
use crate::downtime::{self, DowntimeOptions};
use crate::error::{EngineError, EngineResult};
use crate::runtime::Runtime;
use crate::types::{AcknowledgementType, CommentEntryType, Origin, ServiceState};
use std::sync::Arc;

fn command_error(verb: &str, reason: impl std::fmt::Display) -> EngineError {
    EngineError::ExternalCommand(format!("{verb}: {reason}"))
}

fn arg<'a>(verb: &str, args: &[&'a str], idx: usize) -> EngineResult<&'a str> {
    args.get(idx)
        .copied()
        .ok_or_else(|| command_error(verb, format!("missing argument {}", idx + 1)))
}

fn num_arg(verb: &str, args: &[&str], idx: usize) -> EngineResult<f64> {
    arg(verb, args, idx)?
        .trim()
        .parse()
        .map_err(|_| command_error(verb, format!("argument {} is not a number", idx + 1)))
}

fn host_arg(rt: &Runtime, verb: &str, args: &[&str], idx: usize) -> EngineResult<Arc<Checkable>> {
    let name = arg(verb, args, idx)?;
    rt.checkable(name)
        .ok_or_else(|| command_error(verb, format!("unknown host '{name}'")))
}

fn service_arg(
    rt: &Runtime,
    verb: &str,
    args: &[&str],
) -> EngineResult<Arc<Checkable>> {
    let host = arg(verb, args, 0)?;
    let short = arg(verb, args, 1)?;
    rt.service(host, short)
        .ok_or_else(|| command_error(verb, format!("unknown service '{host}!{short}'")))
}

/// Parse and apply one external command line
pub async fn process_external_command(rt: &Runtime, line: &str) -> EngineResult<()> {
    let line = line.trim();

    // an optional "[<ts>] " prefix carries the submission time
    let rest = match line.strip_prefix('[') {
        Some(rest) => rest
            .split_once("] ")
            .map(|(_, rest)| rest)
            .ok_or_else(|| EngineError::ExternalCommand("unterminated timestamp".into()))?,
        None => line,
    };

    let mut parts = rest.split(';');
    let verb = parts
        .next()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| EngineError::ExternalCommand("empty command".into()))?;
    let args: Vec<&str> = parts.collect();

    tracing::debug!(
        target: "vigil_engine::external_command",
        verb,
        args = args.len(),
        "processing external command"
    );

    match verb {
        "SCHEDULE_FORCED_HOST_CHECK" => {
            let host = host_arg(rt, verb, &args, 0)?;
            host.force_next_check(rt);
            Ok(())
        }
        "SCHEDULE_FORCED_SVC_CHECK" => {
            let service = service_arg(rt, verb, &args)?;
            service.force_next_check(rt);
            Ok(())
        }
        "ACKNOWLEDGE_HOST_PROBLEM" | "ACKNOWLEDGE_HOST_PROBLEM_EXPIRE" => {
            let host = host_arg(rt, verb, &args, 0)?;
            acknowledge(rt, verb, &host, &args[1..], verb.ends_with("_EXPIRE"))
        }
        "ACKNOWLEDGE_SVC_PROBLEM" | "ACKNOWLEDGE_SVC_PROBLEM_EXPIRE" => {
            let service = service_arg(rt, verb, &args)?;
            acknowledge(rt, verb, &service, &args[2..], verb.ends_with("_EXPIRE"))
        }
        "REMOVE_HOST_ACKNOWLEDGEMENT" => {
            let host = host_arg(rt, verb, &args, 0)?;
            host.clear_acknowledgement(rt, Origin::Local, false);
            Ok(())
        }
        "REMOVE_SVC_ACKNOWLEDGEMENT" => {
            let service = service_arg(rt, verb, &args)?;
            service.clear_acknowledgement(rt, Origin::Local, false);
            Ok(())
        }
        "SCHEDULE_HOST_DOWNTIME" => {
            let host = host_arg(rt, verb, &args, 0)?;
            schedule_downtime(rt, verb, &host, &args[1..])
        }
        "SCHEDULE_SVC_DOWNTIME" => {
            let service = service_arg(rt, verb, &args)?;
            schedule_downtime(rt, verb, &service, &args[2..])
        }
        "DEL_HOST_DOWNTIME" | "DEL_SVC_DOWNTIME" => {
            let id: u32 = arg(verb, &args, 0)?
                .trim()
                .parse()
                .map_err(|_| command_error(verb, "downtime id is not a number"))?;

            let dt = rt
                .downtime_by_legacy_id(id)
                .ok_or_else(|| command_error(verb, format!("unknown downtime id {id}")))?;

            downtime::remove_downtime(rt, dt.name(), true, false)
        }
        "PROCESS_HOST_CHECK_RESULT" => {
            let host = host_arg(rt, verb, &args, 0)?;
            let code = num_arg(verb, &args, 1)? as i32;
            // host codes: 0 = UP, anything else = DOWN
            let state = if code == 0 {
                ServiceState::Ok
            } else {
                ServiceState::Critical
            };
            process_passive_result(rt, &host, state, args.get(2).copied().unwrap_or("")).await
        }
        "PROCESS_SERVICE_CHECK_RESULT" => {
            let service = service_arg(rt, verb, &args)?;
            let code = num_arg(verb, &args, 2)? as i32;
            let state = ServiceState::from_exit_code(code);
            process_passive_result(rt, &service, state, args.get(3).copied().unwrap_or("")).await
        }
        "ENABLE_HOST_CHECK" | "DISABLE_HOST_CHECK" => {
            let host = host_arg(rt, verb, &args, 0)?;
            host.set_active_checks_enabled(verb.starts_with("ENABLE"));
            Ok(())
        }
        "ENABLE_SVC_CHECK" | "DISABLE_SVC_CHECK" => {
            let service = service_arg(rt, verb, &args)?;
            service.set_active_checks_enabled(verb.starts_with("ENABLE"));
            Ok(())
        }
        "ENABLE_NOTIFICATIONS" => {
            rt.flags.set_notifications_enabled(true);
            Ok(())
        }
        "DISABLE_NOTIFICATIONS" => {
            rt.flags.set_notifications_enabled(false);
            Ok(())
        }
        other => Err(EngineError::ExternalCommand(format!(
            "unknown command '{other}'"
        ))),
    }
}

/// Shared tail of the ACKNOWLEDGE_* commands:
/// `<sticky>;<notify>;<persistent>;[<expiry>;]<author>;<comment>`
fn acknowledge(
    rt: &Runtime,
    verb: &str,
    checkable: &Arc<Checkable>,
    args: &[&str],
    with_expiry: bool,
) -> EngineResult<()> {
    if checkable.state_is_ok(checkable.state_raw()) {
        return Err(command_error(verb, "the object is not in a problem state"));
    }

    let sticky = num_arg(verb, args, 0)? as i32;
    let notify = num_arg(verb, args, 1)? != 0.0;
    let persistent = num_arg(verb, args, 2)? != 0.0;

    let (expiry, author_idx) = if with_expiry {
        (num_arg(verb, args, 3)?, 4)
    } else {
        (0.0, 3)
    };

    let author = arg(verb, args, author_idx)?;
    let text = arg(verb, args, author_idx + 1)?;

    let ack_type = if sticky == 2 {
        AcknowledgementType::Sticky
    } else {
        AcknowledgementType::Normal
    };

    comment::add_comment(
        rt,
        checkable,
        CommentEntryType::Acknowledgement,
        author,
        text,
        persistent,
        expiry,
    )?;

    checkable.acknowledge_problem(
        rt,
        author,
        text,
        ack_type,
        notify,
        persistent,
        expiry,
        Origin::Local,
    );

    Ok(())
}

/// Shared tail of the SCHEDULE_*_DOWNTIME commands:
/// `<start>;<end>;<fixed>;<trigger_id>;<duration>;<author>;<comment>`
fn schedule_downtime(
    rt: &Runtime,
    verb: &str,
    checkable: &Arc<Checkable>,
    args: &[&str],
) -> EngineResult<()> {
    let start = num_arg(verb, args, 0)?;
    let end = num_arg(verb, args, 1)?;
    let fixed = num_arg(verb, args, 2)? != 0.0;
    let trigger_id = num_arg(verb, args, 3)? as u32;
    let duration = num_arg(verb, args, 4)?;
    let author = arg(verb, args, 5)?;
    let text = arg(verb, args, 6)?;

    let triggered_by = if trigger_id > 0 {
        Some(
            rt.downtime_by_legacy_id(trigger_id)
                .ok_or_else(|| command_error(verb, format!("unknown trigger id {trigger_id}")))?
                .name()
                .to_string(),
        )
    } else {
        None
    };

    downtime::add_downtime(
        rt,
        checkable,
        DowntimeOptions {
            author: author.to_string(),
            comment: text.to_string(),
            start_time: start,
            end_time: end,
            fixed,
            duration,
            triggered_by,
            scheduled_by: None,
            config_owner: None,
        },
    )?;

    Ok(())
}

async fn process_passive_result(
    rt: &Runtime,
    checkable: &Arc<Checkable>,
    state: ServiceState,
    raw_output: &str,
) -> EngineResult<()> {
    if !checkable.passive_checks_enabled() {
        tracing::debug!(
            target: "vigil_engine::external_command",
            checkable = %checkable.name(),
            "ignoring passive result: passive checks are disabled"
        );
        return Ok(());
    }

    let (output, long_output, perfdata) = split_plugin_output(raw_output);

    let mut cr = CheckResult::new(state, output);
    cr.long_output = long_output;
    cr.performance_data = perfdata;
    cr.active = false;

    checkable.process_check_result(rt, cr, Origin::Local).await
}
