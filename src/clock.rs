//! Injectable monotonic clock.
//!
//! Every component that stamps time (sources, output drivers, the engine)
//! takes a [`SharedClock`] so tests can drive time by hand.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Clock handle shared between threads.
pub type SharedClock = Arc<dyn Clock>;

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Returns the process-wide system clock as a [`SharedClock`].
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one handle and give
/// another to the component under test.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<Instant>>,
}

impl ManualClock {
    /// Creates a manual clock starting at the current instant.
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
    }

    /// Returns this clock as a [`SharedClock`].
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }
}

/// Duration covered by `samples` samples at `rate` samples per second.
///
/// Nanosecond precision keeps whole-window durations exact for the common
/// rates (4800 samples at 48 kHz is exactly 100 ms).
pub fn samples_to_duration(samples: u64, rate: u32) -> Duration {
    if rate == 0 {
        return Duration::ZERO;
    }
    let nanos = samples as u128 * 1_000_000_000 / rate as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

/// Applies a signed offset to an instant without panicking on underflow.
pub fn offset_instant(base: Instant, forward: Duration, backward: Duration) -> Instant {
    if forward >= backward {
        base + (forward - backward)
    } else {
        base.checked_sub(backward - forward).unwrap_or(base)
    }
}
