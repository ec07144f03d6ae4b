//! Time management utilities

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of monotonic time
///
/// The render loop reads wall-clock time through this trait so tweens and
/// profiling can be driven deterministically in tests.
pub trait Clock {
    /// Time elapsed since an arbitrary but fixed origin
    fn now(&self) -> Duration;
}

/// Clock backed by [`Instant`]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    /// Create a clock whose origin is the moment of creation
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock
///
/// Clones share the same time, so a test can keep one handle and hand the
/// other to the engine.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    /// Jump to an absolute time
    pub fn set(&self, to: Duration) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Wall time since a fixed start, used to time profiling events
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    /// Start measuring now
    pub fn start_new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Time since start
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time since start in milliseconds
    pub fn elapsed_millis(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }
}
