// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The error taxonomy shared by every fallible API in this crate, plus the
//! `die` escape hatch for the handful of conditions spec §9 calls genuinely
//! unrecoverable (a corrupt static, a board-support layer that handed back
//! an invariant-violating argument at startup).

use core::sync::atomic::{AtomicU32, Ordering};

/// Outcome codes for router, bus and reassembly operations.
///
/// `Internal` should never actually fire; its presence is an invariant
/// violation somewhere upstream of the call that returned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A null, zero, or out-of-range argument was supplied.
    BadArg,
    /// A bus transmit failed.
    Io,
    /// A bounded FIFO (TX or RX queue) was full.
    QueueFull,
    /// A payload length disagreed with the schema's fixed size for its type.
    SizeMismatch,
    /// The byte pool, or a fixed-capacity side/endpoint/subscriber table,
    /// is exhausted.
    Alloc,
    /// An endpoint, side, or subscriber lookup failed.
    NotFound,
    /// An invariant was violated.
    Internal,
}

pub type Result<T> = core::result::Result<T, Error>;

/// The action `die` takes once it has nowhere left to propagate an error.
///
/// Production firmware installs a hook that spins forever (there is no
/// supervisor to restart this task); a hosted test installs one that panics
/// instead, so `#[should_panic]` can assert a code path reached `die`
/// without actually hanging the test process, per spec §9's open question on
/// this point.
pub trait DieHook: Sync {
    fn on_die(&self) -> !;
}

/// Heartbeat event bumped once per spin round by [`SpinDieHook`].
#[derive(Clone, Copy, PartialEq, Eq)]
enum DieEvent {
    Spin,
}

/// Event counts paired with `DieEvent`.
pub struct DieEventCounts {
    spins: AtomicU32,
}

impl counters::Count for DieEvent {
    type Counters = DieEventCounts;
    const NEW_COUNTERS: Self::Counters = DieEventCounts {
        spins: AtomicU32::new(0),
    };

    fn count(&self, counters: &Self::Counters) {
        let Self::Spin = self;
        counters.spins.fetch_add(1, Ordering::Relaxed);
    }
}

counters::counters!(DIE_COUNTERS, DieEvent);

/// Number of `spin_loop` hints between heartbeat counter bumps. Not a
/// calibrated delay (this crate has no access to a hardware timer); it only
/// needs to be coarse enough that `DIE_COUNTERS`'s spin count visibly moves
/// when sampled by a debugger, rather than spinning silently.
const DIE_SPIN_COUNT: u32 = 10_000_000;

/// The default hook for firmware builds: spin forever, incrementing
/// `DIE_COUNTERS`'s spin count roughly once per second so a debugger attached
/// after the fact can tell the hook is alive rather than wedged.
pub struct SpinDieHook;

impl DieHook for SpinDieHook {
    fn on_die(&self) -> ! {
        loop {
            for _ in 0..DIE_SPIN_COUNT {
                core::hint::spin_loop();
            }
            counters::count!(DIE_COUNTERS, DieEvent::Spin);
        }
    }
}

/// Test-only hook: `die` becomes an ordinary panic, catchable with
/// `#[should_panic]`.
#[cfg(test)]
pub struct PanicDieHook;

#[cfg(test)]
impl DieHook for PanicDieHook {
    fn on_die(&self) -> ! {
        panic!("die() reached")
    }
}

/// `die()` (spec §9): the last resort when an error has nowhere left to
/// propagate to. `args` is discarded here (there is no console on this
/// node); it exists so a caller can still write `die(format_args!(...))` the
/// way an ordinary panic call site would, and a debugger inspecting the
/// stack at the call site can read it back from the frame.
pub fn die(hook: &dyn DieHook, args: core::fmt::Arguments<'_>) -> ! {
    let _ = args;
    hook.on_die()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic(expected = "die() reached")]
    fn die_reaches_the_installed_hook() {
        die(&PanicDieHook, format_args!("invariant violated"));
    }
}
