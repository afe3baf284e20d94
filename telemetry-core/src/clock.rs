// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The monotonic clock interface consumed from the board-support layer
//! (spec §6), and the 32→64-bit tick extension built on top of it.

use core::cell::Cell;

/// A millisecond-resolution monotonic clock.
///
/// The board-support layer owns the real implementation (a hardware tick
/// counter); this crate only depends on the trait, so tests can supply a
/// `TestClock` instead.
pub trait MonotonicClock {
    fn now_ms(&self) -> u64;

    /// Hook for stepping the underlying hardware tick counter directly.
    ///
    /// Spec §6 lists this as part of the clock interface, but this crate's
    /// time-sync client applies corrections as a base-offset update (see
    /// `timesync.rs`) rather than calling this, so the default does nothing.
    /// A board-support implementation may wire it to real hardware if it
    /// wants a second, independent correction path.
    fn set_ticks(&self, _value: u32) {}
}

/// Extends a wrapping 32-bit hardware tick counter into a 64-bit millisecond
/// clock.
///
/// Correctness depends on `now_ms` being called more often than the 32-bit
/// tick counter wraps; the worker loop's steady cadence (spec §4.7) satisfies
/// this. A caller that sleeps longer than one wrap period will silently
/// corrupt the extension — see spec §9, "32→64 tick extension".
pub struct TickClock<F> {
    read_ticks: F,
    ticks_per_second: u32,
    high: Cell<u32>,
    last: Cell<u32>,
}

impl<F: Fn() -> u32> TickClock<F> {
    pub const fn new(read_ticks: F, ticks_per_second: u32) -> Self {
        Self {
            read_ticks,
            ticks_per_second,
            high: Cell::new(0),
            last: Cell::new(0),
        }
    }
}

impl<F: Fn() -> u32> MonotonicClock for TickClock<F> {
    fn now_ms(&self) -> u64 {
        let ticks = (self.read_ticks)();
        let last = self.last.get();
        if ticks < last {
            self.high.set(self.high.get().wrapping_add(1));
        }
        self.last.set(ticks);
        let ticks64 = ((self.high.get() as u64) << 32) | ticks as u64;
        (ticks64 * 1000) / self.ticks_per_second as u64
    }
}

/// A directly-settable clock for tests: `now_ms()` returns whatever was last
/// written with `set`, with no tick-extension logic to reason about.
#[cfg(test)]
pub struct TestClock(Cell<u64>);

#[cfg(test)]
impl TestClock {
    pub fn new(now_ms: u64) -> Self {
        Self(Cell::new(now_ms))
    }

    pub fn set(&self, now_ms: u64) {
        self.0.set(now_ms);
    }

    pub fn advance(&self, delta_ms: u64) {
        self.0.set(self.0.get() + delta_ms);
    }
}

#[cfg(test)]
impl MonotonicClock for TestClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}
