//! Timing Utilities
//!
//! High-precision (nanosecond) timers. The GC uses these for pause
//! accounting, the JIT for compile budgets, and the perf monitor for
//! per-operation time stats.

use std::time::{Duration, Instant};

/// Timer - measures elapsed time from construction
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create new timer, started now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get elapsed nanoseconds
    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed().as_nanos() as u64
    }

    /// Get elapsed microseconds
    pub fn elapsed_us(&self) -> u64 {
        self.elapsed().as_micros() as u64
    }

    /// Get elapsed milliseconds
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// Restart the timer, returning the elapsed time up to now
    pub fn restart(&mut self) -> Duration {
        let elapsed = self.start.elapsed();
        self.start = Instant::now();
        elapsed
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped timer - reports its lifetime duration through a callback on drop
pub struct ScopedTimer<'a> {
    start: Instant,
    callback: Box<dyn FnMut(Duration) + 'a>,
}

impl<'a> ScopedTimer<'a> {
    /// Create scoped timer
    pub fn new<F>(callback: F) -> Self
    where
        F: FnMut(Duration) + 'a,
    {
        Self {
            start: Instant::now(),
            callback: Box::new(callback),
        }
    }
}

impl<'a> Drop for ScopedTimer<'a> {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        (self.callback)(duration);
    }
}
