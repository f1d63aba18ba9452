//! Runtime check statistics
//!
//! Four 15-minute per-second rings (active/passive × host/service) plus
//! latency and execution-time aggregation over current results, for
//! status consumers and the scheduler's periodic log line.

use crate::checkable::Checkable;
use crate::ring::RingBuffer;
use crate::types::CheckableType;
use parking_lot::Mutex;
use std::sync::Arc;

const STATS_WINDOW: usize = 15 * 60;

/// Per-second check activity counters
#[derive(Debug)]
pub struct CheckStats {
    active_host_checks: Mutex<RingBuffer>,
    active_service_checks: Mutex<RingBuffer>,
    passive_host_checks: Mutex<RingBuffer>,
    passive_service_checks: Mutex<RingBuffer>,
}

impl Default for CheckStats {
    fn default() -> Self {
        Self {
            active_host_checks: Mutex::new(RingBuffer::new(STATS_WINDOW)),
            active_service_checks: Mutex::new(RingBuffer::new(STATS_WINDOW)),
            passive_host_checks: Mutex::new(RingBuffer::new(STATS_WINDOW)),
            passive_service_checks: Mutex::new(RingBuffer::new(STATS_WINDOW)),
        }
    }
}

impl CheckStats {
    /// Count one processed check result
    pub fn update_check(&self, kind: CheckableType, active: bool, ts: f64) {
        let ring = match (kind, active) {
            (CheckableType::Host, true) => &self.active_host_checks,
            (CheckableType::Host, false) => &self.passive_host_checks,
            (CheckableType::Service, true) => &self.active_service_checks,
            (CheckableType::Service, false) => &self.passive_service_checks,
        };

        ring.lock().insert(ts, 1);
    }

    /// Active checks over the last `span` seconds, hosts and services
    pub fn active_checks(&self, now: f64, span: usize) -> u64 {
        self.active_host_checks.lock().sum(now, span)
            + self.active_service_checks.lock().sum(now, span)
    }

    /// Passive checks over the last `span` seconds
    pub fn passive_checks(&self, now: f64, span: usize) -> u64 {
        self.passive_host_checks.lock().sum(now, span)
            + self.passive_service_checks.lock().sum(now, span)
    }
}

/// Latency / execution-time aggregation over current results
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CheckPerfStats {
    pub min_latency: f64,
    pub max_latency: f64,
    pub avg_latency: f64,
    pub min_execution_time: f64,
    pub max_execution_time: f64,
    pub avg_execution_time: f64,
}

/// Aggregate over the last results of the given checkables
pub fn calculate_perf_stats<'a>(
    checkables: impl Iterator<Item = &'a Arc<Checkable>>,
) -> CheckPerfStats {
    let mut min_latency = -1.0f64;
    let mut max_latency = 0.0f64;
    let mut sum_latency = 0.0f64;
    let mut min_execution = -1.0f64;
    let mut max_execution = 0.0f64;
    let mut sum_execution = 0.0f64;
    let mut count = 0u32;

    for checkable in checkables {
        let Some(cr) = checkable.last_check_result() else {
            continue;
        };

        let latency = cr.latency();
        let execution = cr.execution_time();

        if min_latency < 0.0 || latency < min_latency {
            min_latency = latency;
        }
        if latency > max_latency {
            max_latency = latency;
        }
        sum_latency += latency;

        if min_execution < 0.0 || execution < min_execution {
            min_execution = execution;
        }
        if execution > max_execution {
            max_execution = execution;
        }
        sum_execution += execution;

        count += 1;
    }

    if count == 0 {
        return CheckPerfStats::default();
    }

    CheckPerfStats {
        min_latency: min_latency.max(0.0),
        max_latency,
        avg_latency: sum_latency / count as f64,
        min_execution_time: min_execution.max(0.0),
        max_execution_time: max_execution,
        avg_execution_time: sum_execution / count as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rings_split_by_kind_and_mode() {
        let stats = CheckStats::default();

        stats.update_check(CheckableType::Host, true, 100.0);
        stats.update_check(CheckableType::Service, true, 100.0);
        stats.update_check(CheckableType::Service, true, 101.0);
        stats.update_check(CheckableType::Service, false, 101.0);

        assert_eq!(stats.active_checks(101.0, 60), 3);
        assert_eq!(stats.passive_checks(101.0, 60), 1);
    }

    #[test]
    fn test_window_limits_the_sum() {
        let stats = CheckStats::default();

        stats.update_check(CheckableType::Host, true, 100.0);
        stats.update_check(CheckableType::Host, true, 200.0);

        assert_eq!(stats.active_checks(200.0, 5), 1);
        assert_eq!(stats.active_checks(200.0, 200), 2);
    }
}
