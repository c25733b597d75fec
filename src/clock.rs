//! Time base for timestamps, recovery deadlines and bring-up delays

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Microsecond time source
pub trait Clock: Send + Sync {
    /// Microseconds since an arbitrary fixed origin; never decreases
    fn now_us(&self) -> u64;

    /// Busy/sleep for `us` microseconds
    fn delay_us(&self, us: u64);
}

/// Wall-clock backed time base
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    /// Create a new clock starting now
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        // +1 keeps zero free as the "never" timestamp
        self.start.elapsed().as_micros() as u64 + 1
    }

    fn delay_us(&self, us: u64) {
        std::thread::sleep(Duration::from_micros(us));
    }
}

/// Hand-driven clock for deterministic tests and replay
///
/// `delay_us` advances time instead of sleeping.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock reading `start_us`
    pub fn new(start_us: u64) -> Self {
        Self {
            now: AtomicU64::new(start_us),
        }
    }

    /// Move time forward
    pub fn advance(&self, us: u64) {
        self.now.fetch_add(us, Ordering::SeqCst);
    }

    /// Jump to an absolute time (ignored if it would go backwards)
    pub fn set(&self, us: u64) {
        self.now.fetch_max(us, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn delay_us(&self, us: u64) {
        self.advance(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_delay_advances() {
        let clock = ManualClock::new(1_000);
        clock.delay_us(250);
        assert_eq!(clock.now_us(), 1_250);
        clock.set(100);
        assert_eq!(clock.now_us(), 1_250);
    }

    #[test]
    fn test_monotonic_clock() {
        let clock = MonotonicClock::new();
        let t0 = clock.now_us();
        clock.delay_us(10_000);
        let elapsed = clock.now_us() - t0;
        assert!(elapsed >= 10_000); // At least 10ms
        assert!(elapsed < 100_000); // Less than 100ms
    }
}
