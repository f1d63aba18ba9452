//! Time source abstraction
//!
//! Every component reads wall time through the runtime's `Clock` so tests
//! can drive the engine with a simulated clock.

use parking_lot::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A wall-time source. Timestamps are UNIX seconds as `f64`.
pub trait Clock: Send + Sync {
    /// Current time in UNIX seconds
    fn now(&self) -> f64;
}

/// System wall clock
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Simulated clock for tests; settable and advanceable
#[derive(Debug)]
pub struct SimClock {
    now: Mutex<f64>,
}

impl SimClock {
    /// Create a simulated clock starting at `start` (UNIX seconds)
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by `secs`
    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }

    /// Set the clock to an absolute time
    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }
}

impl Clock for SimClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}
