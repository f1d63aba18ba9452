//! Scheduled downtimes
//!
//! Recurring calendar definitions materialized into concrete downtimes.
//! A 60 s sweep extends an owned downtime when the next calendar segment
//! is contiguous with it, keeps quiet while a long-running or planned
//! child exists, and otherwise creates the next occurrence.

use crate::downtime::{self, DowntimeOptions};
use crate::error::{EngineError, EngineResult};
use crate::runtime::Runtime;
use crate::timeperiod::TimePeriod;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Owned downtimes further out than this are left alone entirely
const LONG_RUNNING_HORIZON: f64 = 12.0 * 3600.0;

/// A recurring downtime definition
#[derive(Debug)]
pub struct ScheduledDowntime {
    name: String,
    pub host_name: String,
    pub service_name: Option<String>,
    pub author: String,
    pub comment: String,
    pub fixed: bool,
    pub duration: f64,
    ranges: TimePeriod,
}

impl ScheduledDowntime {
    pub fn new(
        name: impl Into<String>,
        host_name: impl Into<String>,
        service_name: Option<String>,
        author: impl Into<String>,
        comment: impl Into<String>,
        fixed: bool,
        duration: f64,
        ranges: &BTreeMap<String, String>,
    ) -> EngineResult<Self> {
        let name = name.into();
        let ranges = TimePeriod::new(name.clone(), ranges)?;

        Ok(Self {
            name,
            host_name: host_name.into(),
            service_name,
            author: author.into(),
            comment: comment.into(),
            fixed,
            duration,
            ranges,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn checkable_name(&self) -> String {
        match &self.service_name {
            Some(short) => format!("{}!{}", self.host_name, short),
            None => self.host_name.clone(),
        }
    }
}

/// Materialize the next occurrence for one scheduled downtime
pub fn create_next_downtime(rt: &Runtime, sd: &Arc<ScheduledDowntime>) -> EngineResult<()> {
    let checkable_name = sd.checkable_name();
    let checkable = rt
        .checkable(&checkable_name)
        .ok_or_else(|| EngineError::ObjectNotFound(checkable_name))?;

    let now = rt.now();

    // extend an owned child whose next segment lines up with its end
    for name in checkable.downtime_names() {
        let Some(downtime) = rt.downtime(&name) else {
            continue;
        };

        if downtime.scheduled_by.as_deref() != Some(sd.name()) {
            continue;
        }

        let current_end = downtime.end_time();

        if current_end > now + LONG_RUNNING_HORIZON {
            return Ok(());
        }

        if let Some(segment) = sd.ranges.find_next_segment(now, current_end) {
            if segment.begin == current_end {
                tracing::debug!(
                    target: "vigil_engine::scheduled_downtime",
                    scheduled_downtime = %sd.name(),
                    downtime = %name,
                    new_end = segment.end,
                    "extending downtime into contiguous segment"
                );
                downtime.set_end_time(segment.end);
                return Ok(());
            }
        }
    }

    // a future-planned child means there is nothing to do yet
    let mut min_end = 0.0f64;

    for name in checkable.downtime_names() {
        let Some(downtime) = rt.downtime(&name) else {
            continue;
        };

        let end = downtime.end_time();
        if end > min_end {
            min_end = end;
        }

        if downtime.scheduled_by.as_deref() == Some(sd.name()) && downtime.start_time >= now {
            return Ok(());
        }
    }

    let segment = sd
        .ranges
        .find_running_segment(now, min_end)
        .or_else(|| sd.ranges.find_next_segment(now, 0.0));

    let Some(segment) = segment else {
        return Ok(());
    };

    tracing::info!(
        target: "vigil_engine::scheduled_downtime",
        scheduled_downtime = %sd.name(),
        begin = segment.begin,
        end = segment.end,
        "materializing downtime occurrence"
    );

    downtime::add_downtime(
        rt,
        &checkable,
        DowntimeOptions {
            author: sd.author.clone(),
            comment: sd.comment.clone(),
            start_time: segment.begin,
            end_time: segment.end,
            fixed: sd.fixed,
            duration: sd.duration,
            triggered_by: None,
            scheduled_by: Some(sd.name().to_string()),
            config_owner: Some(sd.name().to_string()),
        },
    )?;

    Ok(())
}

/// 60 s sweep over every scheduled downtime
pub fn sweep(rt: &Runtime) {
    for sd in rt.scheduled_downtimes_snapshot() {
        if let Err(err) = create_next_downtime(rt, &sd) {
            tracing::warn!(
                target: "vigil_engine::scheduled_downtime",
                scheduled_downtime = %sd.name(),
                error = %err,
                "failed to materialize downtime"
            );
        }
    }
}
