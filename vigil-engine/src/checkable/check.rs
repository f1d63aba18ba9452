//! Check scheduling and result processing
//!
//! `process_check_result` is the single entry point that turns a raw
//! `CheckResult` into state transitions, timestamps, flapping updates and
//! signal emissions. All invocations for one checkable are serialized by
//! its state mutex; the mutex is never held across signal emission or
//! `.await`.

use super::{Checkable, CheckableKind, CheckState};
use crate::check_result::CheckResult;
use crate::downtime;
use crate::error::EngineResult;
use crate::runtime::Runtime;
use crate::signals::{
    CheckResultEvent, EventCommandEvent, NextCheckEvent, NotificationRequest, ReachabilityEvent,
    StateChangeEvent,
};
use crate::types::{
    AcknowledgementType, DependencyType, HostState, NotificationType, Origin, ServiceState,
    StateType,
};
use std::sync::Arc;

struct Transition {
    old_cr: Option<Arc<CheckResult>>,
    old_state: ServiceState,
    old_state_type: StateType,
    new_state: ServiceState,
    state_type: StateType,
    attempt: u32,
    recovery: bool,
    state_change: bool,
    hard_change: bool,
    clear_ack: bool,
}

impl Checkable {
    /// Replace the ordering key the scheduler dispatches on
    pub fn set_next_check(&self, rt: &Runtime, next: f64) {
        {
            self.state.lock().next_check = next;
        }

        rt.signals.on_next_check_updated.emit(&NextCheckEvent {
            checkable: self.arc(),
            next_check: next,
        });
    }

    /// Schedule an immediate run that bypasses the active-check and
    /// check-period gates once.
    pub fn force_next_check(&self, rt: &Runtime) {
        let now = rt.now();

        {
            let mut st = self.state.lock();
            st.force_next_check = true;
            st.next_check = now;
        }

        rt.signals.on_next_check_updated.emit(&NextCheckEvent {
            checkable: self.arc(),
            next_check: now,
        });
    }

    pub(crate) fn clear_force_next_check(&self) {
        self.state.lock().force_next_check = false;
    }

    /// Compute the next check time from now, phase-shifted by the
    /// scheduling offset so checkables sharing an interval spread out.
    pub fn update_next_check(&self, rt: &Runtime) {
        let interval = {
            let st = self.state.lock();
            if st.state_type == StateType::Soft && st.last_check_result.is_some() {
                self.retry_interval()
            } else {
                self.config().check_interval
            }
        };

        let now = rt.now();
        let offset = self.scheduling_offset() as f64;

        let mut adj = 0.0;
        if interval > 1.0 {
            adj = ((now * 100.0 + offset) % (interval * 100.0)) / 100.0;
        }
        adj = adj.min(0.5 + (offset % (interval * 5.0)) / 100.0);

        self.set_next_check(rt, now - adj + interval);
    }

    fn save_last_state(&self, st: &mut CheckState, state: ServiceState, now: f64) {
        match self.kind() {
            CheckableKind::Host => match HostState::from_raw(state) {
                HostState::Up => st.last_state_up = now,
                HostState::Down => st.last_state_down = now,
            },
            CheckableKind::Service { .. } => match state {
                ServiceState::Ok => st.last_state_ok = now,
                ServiceState::Warning => st.last_state_warning = now,
                ServiceState::Critical => st.last_state_critical = now,
                ServiceState::Unknown => st.last_state_unknown = now,
            },
        }
    }

    /// Apply one check result to the state machine and emit the resulting
    /// signals.
    pub async fn process_check_result(
        &self,
        rt: &Runtime,
        cr: CheckResult,
        origin: Origin,
    ) -> EngineResult<()> {
        {
            self.state.lock().check_running = false;
        }
        rt.clear_pending_remote(self.name());

        let now = rt.now();
        let mut cr = cr;

        if cr.schedule_start == 0.0 {
            cr.schedule_start = now;
        }
        if cr.schedule_end == 0.0 {
            cr.schedule_end = now;
        }
        if cr.execution_start == 0.0 {
            cr.execution_start = now;
        }
        if cr.execution_end == 0.0 {
            cr.execution_end = now;
        }

        if origin.is_local() {
            cr.check_source = rt.node_name().to_string();
        }

        if let Some(endpoint) = self.config().command_endpoint.clone() {
            if self.config().agent_check {
                // agent results travel back to the scheduling master
                return crate::remote::forward_check_result(rt, self, &cr, &endpoint);
            }
            cr.check_source = endpoint;
        }

        let reachable = self.is_reachable(rt, DependencyType::State);
        let notification_reachable = self.is_reachable(rt, DependencyType::Notification);

        let t = {
            let mut st = self.state.lock();

            if let Some(old_cr) = &st.last_check_result {
                if cr.execution_start < old_cr.execution_start {
                    tracing::debug!(
                        target: "vigil_engine::checkable",
                        checkable = %self.name(),
                        "discarding check result older than the current one"
                    );
                    return Ok(());
                }
            }

            let old_cr = st.last_check_result.clone();
            let old_state = st.state_raw;
            let old_state_type = st.state_type;
            let old_attempt = st.check_attempt;
            let mut recovery = false;

            st.last_state_raw = old_state;
            st.last_state_type = old_state_type;
            st.last_reachable = reachable;

            let new_state = cr.state;
            let mut attempt = 1u32;

            if self.state_is_ok(new_state) {
                st.state_type = StateType::Hard;
                if !self.state_is_ok(old_state) {
                    recovery = true;
                }
                st.notification_number = 0;
                self.save_last_state(&mut st, new_state, now);
            } else {
                if self.state_is_ok(old_state) {
                    // OK -> NOT-OK, first soft state
                    st.state_type = StateType::Soft;
                    attempt = 1;
                }

                if old_state_type == StateType::Soft && !self.state_is_ok(old_state) {
                    st.state_type = StateType::Soft;
                    attempt = old_attempt + 1;
                }

                if attempt >= self.config().max_check_attempts {
                    st.state_type = StateType::Hard;
                    attempt = 1;
                }

                self.save_last_state(&mut st, new_state, now);
            }

            if !reachable {
                st.last_state_unreachable = now;
            }

            st.check_attempt = attempt;
            st.state_raw = new_state;

            let state_change = self.states_differ(old_state, new_state);
            if state_change {
                st.last_state_change = now;
            }

            let clear_ack = state_change
                && (st.acknowledgement == AcknowledgementType::Normal
                    || (st.acknowledgement == AcknowledgementType::Sticky
                        && self.state_is_ok(new_state)));

            let mut hard_change =
                st.state_type == StateType::Hard && old_state_type == StateType::Soft;

            if state_change
                && old_state_type == StateType::Hard
                && st.state_type == StateType::Hard
            {
                hard_change = true;
            }

            if hard_change || self.config().volatile {
                st.last_hard_state_raw = new_state;
                st.last_hard_state_change = now;
            }

            Transition {
                old_cr,
                old_state,
                old_state_type,
                new_state,
                state_type: st.state_type,
                attempt,
                recovery,
                state_change,
                hard_change,
                clear_ack,
            }
        };

        if t.clear_ack {
            self.clear_acknowledgement(rt, origin.clone(), true);
        }

        if t.state_change {
            // a parent's state feeds our reachability; re-check it promptly
            for parent in self.parents(rt) {
                parent.set_next_check(rt, rt.now());
            }
        }

        if !self.state_is_ok(t.new_state) {
            downtime::trigger_downtimes(rt, self);
        }

        rt.stats
            .update_check(self.checkable_type(), cr.active, cr.schedule_end);

        let in_downtime = self.is_in_downtime(rt);
        let acknowledged = self.is_acknowledged(rt);
        let volatile = self.config().volatile;

        let mut would_send = (t.hard_change
            && !(t.old_state_type == StateType::Soft && self.state_is_ok(t.new_state)))
            || (volatile && t.state_type == StateType::Hard);

        if self.state_is_ok(t.old_state) && t.old_state_type == StateType::Soft {
            would_send = false;
        }

        if volatile && self.state_is_ok(t.old_state) && self.state_is_ok(t.new_state) {
            would_send = false;
        }

        let send_notification =
            would_send && notification_reachable && !in_downtime && !acknowledged;

        cr.vars_before = t.old_cr.as_ref().and_then(|old| old.vars_after.clone());
        cr.vars_after = Some(serde_json::json!({
            "state": t.new_state,
            "state_type": t.state_type,
            "attempt": t.attempt,
            "reachable": reachable,
        }));

        let active = cr.active;
        let result = Arc::new(cr);

        {
            self.state.lock().last_check_result = Some(result.clone());
        }

        let was_flapping = self.is_flapping(rt);
        self.update_flapping_status(now, t.old_state != t.new_state);
        let is_flapping = self.is_flapping(rt);

        if active {
            self.update_next_check(rt);
        } else {
            // passive freshness window: stay quiet while passive results flow
            self.set_next_check(rt, rt.now() + self.config().check_interval);
        }

        if self.state_is_ok(t.new_state) != self.state_is_ok(t.old_state) {
            let children = self.children(rt);
            if !children.is_empty() {
                rt.signals.on_reachability_changed.emit(&ReachabilityEvent {
                    checkable: self.arc(),
                    result: result.clone(),
                    children,
                    origin: origin.clone(),
                });
            }
        }

        rt.signals.on_new_check_result.emit(&CheckResultEvent {
            checkable: self.arc(),
            result: result.clone(),
            origin: origin.clone(),
            change_id: rt.next_change_id(),
        });

        let volatile_not_ok =
            volatile && !(self.state_is_ok(t.old_state) && self.state_is_ok(t.new_state));

        if t.hard_change || volatile_not_ok {
            rt.signals.on_state_change.emit(&StateChangeEvent {
                checkable: self.arc(),
                result: result.clone(),
                state_type: StateType::Hard,
                origin: origin.clone(),
            });

            tracing::info!(
                target: "vigil_engine::checkable",
                checkable = %self.name(),
                from = t.old_state.as_str(),
                to = t.new_state.as_str(),
                volatile,
                "hard state change"
            );
        } else if t.state_change || t.state_type == StateType::Soft {
            rt.signals.on_state_change.emit(&StateChangeEvent {
                checkable: self.arc(),
                result: result.clone(),
                state_type: StateType::Soft,
                origin: origin.clone(),
            });

            tracing::debug!(
                target: "vigil_engine::checkable",
                checkable = %self.name(),
                from = t.old_state.as_str(),
                to = t.new_state.as_str(),
                attempt = t.attempt,
                "soft state change"
            );
        }

        if t.state_type == StateType::Soft || t.hard_change || t.recovery || volatile_not_ok {
            if let Err(err) = self.execute_event_handler(rt).await {
                tracing::warn!(
                    target: "vigil_engine::checkable",
                    checkable = %self.name(),
                    error = %err,
                    "event handler failed"
                );
            }
        }

        if !in_downtime && !was_flapping && is_flapping {
            // the change that tipped the detector is itself suppressed, so
            // sample the pre-change state for the replay comparison
            self.begin_suppression_from(t.old_state);

            rt.signals.on_notifications_requested.emit(&NotificationRequest {
                checkable: self.arc(),
                notification_type: NotificationType::FlappingStart,
                result: Some(result.clone()),
                author: String::new(),
                text: String::new(),
                origin: origin.clone(),
            });

            tracing::info!(
                target: "vigil_engine::checkable",
                checkable = %self.name(),
                current = self.flapping_current(),
                threshold = self.config().flapping_threshold_high,
                "flapping started"
            );
        } else if !in_downtime && was_flapping && !is_flapping {
            rt.signals.on_notifications_requested.emit(&NotificationRequest {
                checkable: self.arc(),
                notification_type: NotificationType::FlappingEnd,
                result: Some(result.clone()),
                author: String::new(),
                text: String::new(),
                origin: origin.clone(),
            });

            tracing::info!(
                target: "vigil_engine::checkable",
                checkable = %self.name(),
                current = self.flapping_current(),
                threshold = self.config().flapping_threshold_low,
                "flapping stopped"
            );

            self.fire_suppressed_notifications(rt);
        }

        if send_notification && !is_flapping {
            let ty = if t.recovery {
                NotificationType::Recovery
            } else {
                NotificationType::Problem
            };

            if ty == NotificationType::Problem {
                self.state.lock().notification_number += 1;
            }

            rt.signals.on_notifications_requested.emit(&NotificationRequest {
                checkable: self.arc(),
                notification_type: ty,
                result: Some(result),
                author: String::new(),
                text: String::new(),
                origin,
            });
        } else if would_send && (in_downtime || acknowledged || is_flapping) {
            // deferred: remember what the overlay swallowed for replay
            let ty = if t.recovery {
                NotificationType::Recovery
            } else {
                NotificationType::Problem
            };
            self.record_suppressed(ty);
        }

        Ok(())
    }

    /// Run the configured event command when a state transition warrants it
    pub async fn execute_event_handler(&self, rt: &Runtime) -> EngineResult<()> {
        if !rt.flags.event_handlers_enabled() || !self.event_handler_enabled() {
            return Ok(());
        }

        let Some(name) = self.config().event_command.clone() else {
            return Ok(());
        };

        let Some(command) = rt.event_command(&name) else {
            tracing::warn!(
                target: "vigil_engine::checkable",
                checkable = %self.name(),
                command = %name,
                "event command is not registered"
            );
            return Ok(());
        };

        command.execute(rt, self).await?;

        rt.signals.on_event_command_executed.emit(&EventCommandEvent {
            checkable: self.arc(),
        });

        Ok(())
    }
}
