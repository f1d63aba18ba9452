//! Scheduled-downtime materialization

mod common;

use chrono::{Local, NaiveDate, TimeZone};
use std::collections::BTreeMap;
use std::sync::Arc;
use vigil_engine::{
    downtime, scheduled_downtime, Runtime, ScheduledDowntime, SimClock,
};

// 2026-03-02 is a Monday
fn local_ts(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> f64 {
    let naive = NaiveDate::from_ymd_opt(year, month, day)
        .unwrap()
        .and_hms_opt(hour, minute, 0)
        .unwrap();
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap()
        .timestamp() as f64
}

fn weekday_ranges(days: &[&str], window: &str) -> BTreeMap<String, String> {
    days.iter()
        .map(|day| (day.to_string(), window.to_string()))
        .collect()
}

fn setup(start: f64, ranges: BTreeMap<String, String>) -> (Arc<Runtime>, Arc<SimClock>) {
    let clock = Arc::new(SimClock::new(start));
    let rt = Runtime::new("node-a", clock.clone());

    rt.register_host("web", common::config(1)).unwrap();
    rt.register_scheduled_downtime(
        ScheduledDowntime::new(
            "maint",
            "web",
            None,
            "ops",
            "weekly maintenance",
            true,
            0.0,
            &ranges,
        )
        .unwrap(),
    )
    .unwrap();

    (rt, clock)
}

fn owned_downtimes(rt: &Runtime) -> Vec<Arc<vigil_engine::Downtime>> {
    rt.downtimes_snapshot()
        .into_iter()
        .filter(|d| d.config_owner.as_deref() == Some("maint"))
        .collect()
}

/// S7: a running segment materializes in place, expires at its end, and
/// the next occurrence appears ahead of its window.
#[tokio::test]
async fn materializes_expires_and_replans() {
    let monday_noon = local_ts(2026, 3, 2, 12, 0);
    let ranges = weekday_ranges(&["monday", "tuesday"], "09:00-17:00");
    let (rt, clock) = setup(monday_noon, ranges);

    scheduled_downtime::sweep(&rt);

    let owned = owned_downtimes(&rt);
    assert_eq!(owned.len(), 1);
    let first = &owned[0];
    assert_eq!(first.start_time, local_ts(2026, 3, 2, 9, 0));
    assert_eq!(first.end_time(), local_ts(2026, 3, 2, 17, 0));
    assert!(first.is_in_effect(rt.now()));
    assert!(first.start_time <= rt.now() && rt.now() <= first.end_time());

    // repeat sweeps must not duplicate the running occurrence
    scheduled_downtime::sweep(&rt);
    let owned = owned_downtimes(&rt);
    // the materializer may plan tuesday ahead, but monday exists once
    assert_eq!(
        owned
            .iter()
            .filter(|d| d.start_time == local_ts(2026, 3, 2, 9, 0))
            .count(),
        1
    );

    // past the end the expiry sweep reaps it
    clock.set(local_ts(2026, 3, 2, 17, 30));
    downtime::sweep_expired(&rt);
    assert!(owned_downtimes(&rt)
        .iter()
        .all(|d| d.start_time != local_ts(2026, 3, 2, 9, 0)));

    // tuesday morning the next occurrence gets planned
    clock.set(local_ts(2026, 3, 3, 8, 59));
    downtime::sweep_expired(&rt);
    scheduled_downtime::sweep(&rt);

    let owned = owned_downtimes(&rt);
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].start_time, local_ts(2026, 3, 3, 9, 0));
    assert!(!owned[0].is_in_effect(rt.now()));

    clock.set(local_ts(2026, 3, 3, 9, 1));
    assert!(owned[0].is_in_effect(rt.now()));
}

/// A contiguous following segment extends the running downtime instead
/// of spawning a second one.
#[tokio::test]
async fn contiguous_segment_extends_the_child() {
    let monday_ten = local_ts(2026, 3, 2, 10, 0);
    let ranges = weekday_ranges(&["monday"], "09:00-12:00,12:00-17:00");
    let (rt, _clock) = setup(monday_ten, ranges);

    scheduled_downtime::sweep(&rt);

    let owned = owned_downtimes(&rt);
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].end_time(), local_ts(2026, 3, 2, 12, 0));

    scheduled_downtime::sweep(&rt);

    let owned = owned_downtimes(&rt);
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].end_time(), local_ts(2026, 3, 2, 17, 0));
}

/// While an owned child is planned for the future, sweeps stay quiet
#[tokio::test]
async fn future_child_blocks_replanning() {
    let sunday_noon = local_ts(2026, 3, 1, 12, 0);
    let ranges = weekday_ranges(&["monday"], "09:00-17:00");
    let (rt, _clock) = setup(sunday_noon, ranges);

    scheduled_downtime::sweep(&rt);
    scheduled_downtime::sweep(&rt);
    scheduled_downtime::sweep(&rt);

    let owned = owned_downtimes(&rt);
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].start_time, local_ts(2026, 3, 2, 9, 0));
}

/// Orphaned children are reaped once their owner disappears
#[tokio::test]
async fn orphaned_child_is_reaped() {
    let monday_noon = local_ts(2026, 3, 2, 12, 0);
    let ranges = weekday_ranges(&["monday"], "09:00-17:00");
    let (rt, _clock) = setup(monday_noon, ranges);

    scheduled_downtime::sweep(&rt);
    assert_eq!(owned_downtimes(&rt).len(), 1);

    rt.unregister_scheduled_downtime("maint");
    downtime::sweep_expired(&rt);

    assert!(owned_downtimes(&rt).is_empty());
}
