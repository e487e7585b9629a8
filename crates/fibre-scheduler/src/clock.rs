#![forbid(unsafe_code)]

//! Time sources.
//!
//! Everything in the scheduler measures time in fractional milliseconds
//! relative to an arbitrary origin. Production code uses [`MonotonicClock`];
//! tests use [`ManualClock`] so that slices, timeouts and starvation can be
//! driven deterministically.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;

/// A monotonic millisecond time source.
pub trait Clock: fmt::Debug {
    /// Milliseconds since this clock's origin.
    fn now(&self) -> f64;
}

/// Wall-clock time based on [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    /// Create a clock whose origin is the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1_000.0
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// hand another to the scheduler.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    /// Create a clock starting at `start_ms`.
    pub fn new(start_ms: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    /// Move time forward by `delta_ms`. Negative deltas are ignored.
    pub fn advance(&self, delta_ms: f64) {
        if delta_ms > 0.0 {
            self.now.set(self.now.get() + delta_ms);
        }
    }

    /// Jump to an absolute time. Times in the past are ignored.
    pub fn set(&self, at_ms: f64) {
        if at_ms > self.now.get() {
            self.now.set(at_ms);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_shares_time_between_clones() {
        let clock = ManualClock::new(10.0);
        let other = clock.clone();
        clock.advance(5.0);
        assert_eq!(other.now(), 15.0);
    }

    #[test]
    fn manual_clock_never_goes_backwards() {
        let clock = ManualClock::new(100.0);
        clock.advance(-50.0);
        clock.set(20.0);
        assert_eq!(clock.now(), 100.0);
        clock.set(120.0);
        assert_eq!(clock.now(), 120.0);
    }

    #[test]
    fn monotonic_clock_is_non_decreasing() {
        let clock = MonotonicClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
