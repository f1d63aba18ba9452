//! Flapping detection
//!
//! A 20-slot rolling bit buffer of state changes, weighted toward recent
//! slots, with hysteresis between the low and high thresholds.

use super::{CheckState, Checkable};
use crate::runtime::Runtime;

const FLAPPING_SLOTS: usize = 20;

impl Checkable {
    /// Record whether the stored state changed on this result and
    /// recompute the oscillation percentage.
    pub(crate) fn update_flapping_status(&self, now: f64, state_change: bool) {
        let low = self.config().flapping_threshold_low;
        let high = self.config().flapping_threshold_high;

        let mut st = self.state.lock();
        update(&mut st, now, state_change, low, high);
    }

    /// Current oscillation percentage, 0..=100
    pub fn flapping_current(&self) -> f64 {
        self.state.lock().flapping_current
    }

    /// The stored flapping flag, gated by the per-checkable and global
    /// enable switches.
    pub fn is_flapping(&self, rt: &Runtime) -> bool {
        if !self.flapping_enabled() || !rt.flags.flapping_enabled() {
            return false;
        }

        self.state.lock().flapping
    }
}

fn update(st: &mut CheckState, now: f64, state_change: bool, low: f64, high: f64) {
    let mut buffer = st.flapping_buffer;
    let mut index = st.flapping_index;

    if state_change {
        buffer |= 1 << index;
    } else {
        buffer &= !(1 << index);
    }

    index = (index + 1) % FLAPPING_SLOTS;

    // weighted total over the window, oldest slot first
    let mut changes = 0.0;
    for i in 0..FLAPPING_SLOTS {
        if buffer & (1 << ((index + i) % FLAPPING_SLOTS)) != 0 {
            changes += 0.8 + 0.02 * i as f64;
        }
    }

    let value = 100.0 * changes / FLAPPING_SLOTS as f64;

    let flapping = if st.flapping { value > low } else { value > high };

    if flapping != st.flapping {
        st.flapping_last_change = now;
    }

    st.flapping_buffer = buffer;
    st.flapping_index = index;
    st.flapping_current = value;
    st.flapping = flapping;
}
