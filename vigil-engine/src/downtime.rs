//! Downtimes
//!
//! A downtime is a window during which notifications for a checkable are
//! suppressed. Fixed downtimes run on the calendar; flexible ones start a
//! duration on the first in-window failure. Two sweeps drive the
//! lifecycle: a 5 s timer starts fixed downtimes whose window has opened,
//! a 60 s timer cancels expired ones.

use crate::checkable::Checkable;
use crate::error::{EngineError, EngineResult};
use crate::runtime::Runtime;
use crate::signals::{DowntimeEvent, NotificationRequest};
use crate::types::{NotificationType, Origin};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Default)]
struct DowntimeState {
    end_time: f64,
    /// 0 = not yet triggered
    trigger_time: f64,
    /// Downtimes triggered together with this one
    triggers: BTreeSet<String>,
    remove_time: f64,
    was_cancelled: bool,
}

/// One concrete downtime window
#[derive(Debug)]
pub struct Downtime {
    name: String,
    pub host_name: String,
    pub service_name: Option<String>,
    pub author: String,
    pub comment: String,
    pub entry_time: f64,
    pub start_time: f64,
    pub fixed: bool,
    /// Suppression length for flexible downtimes, seconds
    pub duration: f64,
    pub triggered_by: Option<String>,
    pub scheduled_by: Option<String>,
    /// Owning scheduled downtime; blocks operator removal until expiry
    pub config_owner: Option<String>,
    pub legacy_id: u32,
    state: Mutex<DowntimeState>,
}

impl Downtime {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full name of the owning checkable
    pub fn checkable_name(&self) -> String {
        match &self.service_name {
            Some(short) => format!("{}!{}", self.host_name, short),
            None => self.host_name.clone(),
        }
    }

    pub fn end_time(&self) -> f64 {
        self.state.lock().end_time
    }

    /// Extend the window; used by the scheduled-downtime materializer to
    /// merge contiguous segments.
    pub(crate) fn set_end_time(&self, end: f64) {
        self.state.lock().end_time = end;
    }

    pub fn trigger_time(&self) -> f64 {
        self.state.lock().trigger_time
    }

    pub fn was_cancelled(&self) -> bool {
        self.state.lock().was_cancelled
    }

    pub fn trigger_names(&self) -> Vec<String> {
        self.state.lock().triggers.iter().cloned().collect()
    }

    pub(crate) fn add_trigger(&self, name: &str) {
        self.state.lock().triggers.insert(name.to_string());
    }

    /// Whether the downtime currently suppresses notifications
    pub fn is_in_effect(&self, now: f64) -> bool {
        let st = self.state.lock();

        if now < self.start_time || now > st.end_time {
            return false;
        }

        if self.fixed {
            return true;
        }

        st.trigger_time > 0.0 && now < st.trigger_time + self.duration
    }

    pub fn is_triggered(&self, now: f64) -> bool {
        let trigger_time = self.state.lock().trigger_time;
        trigger_time > 0.0 && trigger_time <= now
    }

    pub fn is_expired(&self, now: f64) -> bool {
        let end_time = self.end_time();

        if self.fixed {
            return end_time < now;
        }

        // a triggered flexible downtime that ran out, or one that never
        // triggered inside its window
        (self.is_triggered(now) && !self.is_in_effect(now))
            || (!self.is_triggered(now) && end_time < now)
    }

    pub fn can_be_triggered(&self, now: f64) -> bool {
        if self.is_in_effect(now) && self.is_triggered(now) {
            return false;
        }

        if self.is_expired(now) {
            return false;
        }

        now >= self.start_time && now <= self.end_time()
    }
}

/// Parameters for [`add_downtime`]
#[derive(Debug, Clone)]
pub struct DowntimeOptions {
    pub author: String,
    pub comment: String,
    pub start_time: f64,
    pub end_time: f64,
    pub fixed: bool,
    pub duration: f64,
    pub triggered_by: Option<String>,
    pub scheduled_by: Option<String>,
    pub config_owner: Option<String>,
}

/// Register a downtime on a checkable. Already-running fixed downtimes
/// start immediately; a checkable already in a problem state triggers
/// flexible ones right away.
pub fn add_downtime(
    rt: &Runtime,
    checkable: &Checkable,
    opts: DowntimeOptions,
) -> EngineResult<Arc<Downtime>> {
    if opts.start_time <= 0.0 {
        return Err(EngineError::validation(
            "start_time",
            "start time must be greater than 0",
        ));
    }

    if opts.end_time <= 0.0 {
        return Err(EngineError::validation(
            "end_time",
            "end time must be greater than 0",
        ));
    }

    let name = format!("{}!{}", checkable.name(), uuid::Uuid::new_v4());
    let (host_name, service_name) = rt.split_checkable_name(checkable);

    let downtime = Arc::new(Downtime {
        legacy_id: rt.next_downtime_legacy_id(&name),
        name: name.clone(),
        host_name,
        service_name,
        author: opts.author,
        comment: opts.comment,
        entry_time: rt.now(),
        start_time: opts.start_time,
        fixed: opts.fixed,
        duration: opts.duration,
        triggered_by: opts.triggered_by.clone(),
        scheduled_by: opts.scheduled_by,
        config_owner: opts.config_owner,
        state: Mutex::new(DowntimeState {
            end_time: opts.end_time,
            ..DowntimeState::default()
        }),
    });

    rt.insert_downtime(downtime.clone(), checkable);

    if let Some(parent_name) = &opts.triggered_by {
        if let Some(parent) = rt.downtime(parent_name) {
            parent.add_trigger(&name);
        }
    }

    tracing::info!(
        target: "vigil_engine::downtime",
        downtime = %name,
        checkable = %checkable.name(),
        fixed = downtime.fixed,
        "added downtime"
    );

    rt.signals.on_downtime_added.emit(&DowntimeEvent {
        downtime: downtime.clone(),
    });

    let now = rt.now();

    if downtime.fixed && downtime.can_be_triggered(now) {
        // the window is already open
        downtime_started(rt, &downtime);
    } else if !checkable.state_is_ok(checkable.state_raw()) {
        tracing::info!(
            target: "vigil_engine::downtime",
            checkable = %checkable.name(),
            "checkable already in a problem state, triggering downtime now"
        );
        trigger_downtime(rt, &downtime);
    }

    Ok(downtime)
}

/// Remove a downtime. `cancelled` marks operator removal; sweeps pass
/// `expired` so scheduled-downtime children can be reaped.
pub fn remove_downtime(rt: &Runtime, name: &str, cancelled: bool, expired: bool) -> EngineResult<()> {
    let downtime = rt
        .downtime(name)
        .ok_or_else(|| EngineError::ObjectNotFound(name.to_string()))?;

    if let Some(owner) = &downtime.config_owner {
        if !expired {
            return Err(EngineError::DowntimeOwned {
                downtime: name.to_string(),
                owner: owner.clone(),
            });
        }
    }

    let now = rt.now();
    let ended = downtime.is_triggered(now);

    {
        let mut st = downtime.state.lock();
        st.was_cancelled = cancelled;
        st.remove_time = now;
    }

    rt.take_downtime(name);

    tracing::info!(
        target: "vigil_engine::downtime",
        downtime = %name,
        checkable = %downtime.checkable_name(),
        cancelled,
        "removed downtime"
    );

    rt.signals.on_downtime_removed.emit(&DowntimeEvent {
        downtime: downtime.clone(),
    });

    let checkable = rt.checkable(&downtime.checkable_name());

    // flexible downtimes that never triggered end silently
    if ended {
        if let Some(checkable) = &checkable {
            let ty = if cancelled {
                NotificationType::DowntimeRemoved
            } else {
                NotificationType::DowntimeEnd
            };

            rt.signals.on_notifications_requested.emit(&NotificationRequest {
                checkable: checkable.clone(),
                notification_type: ty,
                result: checkable.last_check_result(),
                author: downtime.author.clone(),
                text: downtime.comment.clone(),
                origin: Origin::Local,
            });
        }
    }

    if let Some(checkable) = &checkable {
        checkable.fire_suppressed_notifications(rt);
    }

    Ok(())
}

/// Announce the start of a fixed downtime and trigger it
pub(crate) fn downtime_started(rt: &Runtime, downtime: &Arc<Downtime>) {
    let Some(checkable) = rt.checkable(&downtime.checkable_name()) else {
        return;
    };

    checkable.begin_suppression();

    rt.signals.on_downtime_started.emit(&DowntimeEvent {
        downtime: downtime.clone(),
    });

    rt.signals.on_notifications_requested.emit(&NotificationRequest {
        checkable: checkable.clone(),
        notification_type: NotificationType::DowntimeStart,
        result: checkable.last_check_result(),
        author: downtime.author.clone(),
        text: downtime.comment.clone(),
        origin: Origin::Local,
    });

    trigger_downtime(rt, downtime);
}

/// Trigger a downtime and, recursively, everything in its trigger list
pub fn trigger_downtime(rt: &Runtime, downtime: &Arc<Downtime>) {
    let now = rt.now();

    if !downtime.can_be_triggered(now) {
        return;
    }

    tracing::info!(
        target: "vigil_engine::downtime",
        downtime = %downtime.name(),
        "triggering downtime"
    );

    let first_trigger = {
        let mut st = downtime.state.lock();
        if st.trigger_time == 0.0 {
            st.trigger_time = now;
            true
        } else {
            false
        }
    };

    for name in downtime.trigger_names() {
        if let Some(child) = rt.downtime(&name) {
            trigger_downtime(rt, &child);
        }
    }

    if !downtime.fixed && first_trigger {
        if let Some(checkable) = rt.checkable(&downtime.checkable_name()) {
            checkable.begin_suppression();

            rt.signals.on_notifications_requested.emit(&NotificationRequest {
                checkable: checkable.clone(),
                notification_type: NotificationType::DowntimeStart,
                result: checkable.last_check_result(),
                author: downtime.author.clone(),
                text: downtime.comment.clone(),
                origin: Origin::Local,
            });
        }
    }

    rt.signals.on_downtime_triggered.emit(&DowntimeEvent {
        downtime: downtime.clone(),
    });
}

/// Trigger every downtime registered on `checkable` whose window allows it
pub fn trigger_downtimes(rt: &Runtime, checkable: &Checkable) {
    for name in checkable.downtime_names() {
        if let Some(downtime) = rt.downtime(&name) {
            trigger_downtime(rt, &downtime);
        }
    }
}

/// 5 s sweep: start fixed downtimes whose window has opened. Flexible
/// downtimes are triggered on demand by the result processor.
pub fn sweep_start(rt: &Runtime) {
    let now = rt.now();

    for downtime in rt.downtimes_snapshot() {
        if downtime.fixed && downtime.can_be_triggered(now) {
            downtime_started(rt, &downtime);
        }
    }
}

/// 60 s sweep: cancel expired downtimes and orphans whose scheduled
/// downtime is gone
pub fn sweep_expired(rt: &Runtime) {
    let now = rt.now();

    for downtime in rt.downtimes_snapshot() {
        let orphaned = downtime
            .config_owner
            .as_ref()
            .is_some_and(|owner| rt.scheduled_downtime(owner).is_none());

        if downtime.is_expired(now) || orphaned {
            if let Err(err) = remove_downtime(rt, downtime.name(), false, true) {
                tracing::warn!(
                    target: "vigil_engine::downtime",
                    downtime = %downtime.name(),
                    error = %err,
                    "failed to remove expired downtime"
                );
            }
        }
    }
}
