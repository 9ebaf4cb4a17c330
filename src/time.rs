//! Time sources for the scheduler and the SMP boot protocol.
//!
//! The hardware busy-waits the original design leans on (ICR settle delays,
//! the AP boot-flag poll, sleep deadlines) all go through [`TimeSource`],
//! so deterministic tests can simulate both prompt and delayed hardware
//! acknowledgement without real busy-waiting.

use core::sync::atomic::{AtomicU64, Ordering};

/// Timer interrupt frequency. One tick is one scheduler quantum unit.
pub const TICK_HZ: u64 = 1000;

/// Milliseconds per tick at [`TICK_HZ`].
pub const MS_PER_TICK: u64 = 1000 / TICK_HZ;

/// A monotonic tick counter the core schedules against.
///
/// Implementations must be cheap to read; `delay_ticks` is the bounded-spin
/// primitive the boot protocol uses between hardware steps.
pub trait TimeSource: Send + Sync {
    /// Current tick count.
    fn now_ticks(&self) -> u64;

    /// Spin until at least `ticks` have elapsed.
    fn delay_ticks(&self, ticks: u64) {
        let deadline = self.now_ticks().saturating_add(ticks);
        while self.now_ticks() < deadline {
            core::hint::spin_loop();
        }
    }
}

/// The kernel's tick clock, advanced by the timer interrupt path.
///
/// On hardware the tick handler calls [`TickClock::tick`] before handing the
/// interrupt to `Scheduler::timer_tick`; wall time is derived from the tick
/// count and [`TICK_HZ`].
pub struct TickClock {
    ticks: AtomicU64,
}

impl TickClock {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }

    /// Advance one tick. Called from the timer interrupt.
    pub fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Release) + 1
    }

    /// Wall time in milliseconds since boot.
    pub fn wall_ms(&self) -> u64 {
        self.ticks.load(Ordering::Acquire) * MS_PER_TICK
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for TickClock {
    fn now_ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }
}

/// Test clock with explicit control over the tick count.
///
/// With a non-zero `auto_step`, every read advances the clock, so bounded
/// polls and timeout loops terminate without a driver thread.
pub struct ManualClock {
    ticks: AtomicU64,
    auto_step: u64,
}

impl ManualClock {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            auto_step: 0,
        }
    }

    /// A clock that advances by `step` ticks on every `now_ticks` read.
    pub const fn auto(step: u64) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            auto_step: step,
        }
    }

    pub fn advance(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::Release);
    }

    pub fn set(&self, ticks: u64) {
        self.ticks.store(ticks, Ordering::Release);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualClock {
    fn now_ticks(&self) -> u64 {
        if self.auto_step > 0 {
            self.ticks.fetch_add(self.auto_step, Ordering::AcqRel) + self.auto_step
        } else {
            self.ticks.load(Ordering::Acquire)
        }
    }

    fn delay_ticks(&self, ticks: u64) {
        // The manual clock never spins; a delay is just elapsed time.
        self.ticks.fetch_add(ticks.max(1), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_clock_advances_and_reports_wall_time() {
        let clock = TickClock::new();
        assert_eq!(clock.now_ticks(), 0);
        for _ in 0..5 {
            clock.tick();
        }
        assert_eq!(clock.now_ticks(), 5);
        assert_eq!(clock.wall_ms(), 5 * MS_PER_TICK);
    }

    #[test]
    fn manual_clock_delay_is_virtual() {
        let clock = ManualClock::new();
        clock.delay_ticks(10);
        assert_eq!(clock.now_ticks(), 10);
    }

    #[test]
    fn auto_clock_terminates_bounded_spins() {
        let clock = ManualClock::auto(1);
        let start = clock.now_ticks();
        clock.delay_ticks(3);
        assert!(clock.now_ticks() > start);
    }
}
