//! Monotonic-time helpers for the TTL heap and idle-timeout list.
//!
//! Both subsystems reason about "milliseconds since some fixed point", never
//! wall-clock time, so that a system clock adjustment can never un-expire a
//! key or resurrect an idle connection.

use std::time::Instant;

/// Returns milliseconds elapsed since an arbitrary, process-local epoch.
///
/// Backed by [`Instant`], so it is immune to wall-clock adjustments (NTP
/// steps, manual clock changes). Not meaningful across process restarts or
/// between processes.
pub fn monotonic_now_ms() -> u64 {
    MonotonicClock::global().now_ms()
}

/// A monotonic millisecond clock anchored at construction time.
///
/// Exists as a type (rather than a bare function) so tests can construct
/// their own clock and fast-forward it without sleeping in wall-clock time.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    /// Creates a new clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Milliseconds elapsed since this clock was constructed.
    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn global() -> &'static MonotonicClock {
        use std::sync::OnceLock;
        static CLOCK: OnceLock<MonotonicClock> = OnceLock::new();
        CLOCK.get_or_init(MonotonicClock::new)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn now_ms_is_monotonic_and_advances() {
        let clock = MonotonicClock::new();
        let t0 = clock.now_ms();
        sleep(Duration::from_millis(5));
        let t1 = clock.now_ms();
        assert!(t1 >= t0);
    }

    #[test]
    fn global_clock_advances() {
        let a = monotonic_now_ms();
        sleep(Duration::from_millis(2));
        let b = monotonic_now_ms();
        assert!(b >= a);
    }
}
