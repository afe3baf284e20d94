// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The lock-free SPSC ring between the CAN RX interrupt and the worker,
//! spec §4.1.
//!
//! The producer (`push`, called from the ISR) must never block; on a full
//! ring it evicts the oldest slot instead. The consumer (`pop`, called from
//! the worker) only ever advances `tail`. Index publication uses
//! release-store / acquire-load, the same discipline
//! `drv-stm32h7-eth::ring::TxRing`/`RxRing` use for descriptor ownership bits
//! shared with DMA hardware.

use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use core::cell::UnsafeCell;

/// Trace events recorded by the RX ring.
#[derive(Clone, Copy, PartialEq, Eq)]
enum RingEvent {
    None,
    Pushed,
    /// The ring was full; the oldest slot was evicted to make room.
    EvictedOldest,
    Popped,
}

ringbuf::ringbuf!(RING_TRACE, RingEvent, 32, RingEvent::None);

/// Event counts paired with the trace buffer above.
pub struct RingEventCounts {
    evicted_oldest: AtomicU32,
}

impl counters::Count for RingEvent {
    type Counters = RingEventCounts;
    const NEW_COUNTERS: Self::Counters = RingEventCounts {
        evicted_oldest: AtomicU32::new(0),
    };

    fn count(&self, counters: &Self::Counters) {
        if let RingEvent::EvictedOldest = self {
            counters.evicted_oldest.fetch_add(1, Ordering::Relaxed);
        }
    }
}

counters::counters!(RING_COUNTERS, RingEvent);

/// One CAN-FD frame as handed off by the bus driver's ISR callback.
#[derive(Clone, Copy)]
pub struct RingSlot {
    pub std_id: u16,
    pub len: u8,
    pub bytes: [u8; 64],
}

impl RingSlot {
    pub const EMPTY: Self = Self {
        std_id: 0,
        len: 0,
        bytes: [0; 64],
    };

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// A power-of-two-capacity circular buffer of `RingSlot`s.
///
/// Single producer (the RX ISR, via `push`), single consumer (the worker,
/// via `pop`). `N` (the number of frames the ring can hold, spec default 64)
/// must be a power of two; this is checked at construction.
///
/// The backing array is sized `N + 1`: a plain head/tail pair needs one
/// unused slot to tell "empty" and "full" apart, and the spec's own worked
/// example (§8 scenario 5: filling the ring with exactly 64 frames leaves it
/// full, and only the 65th push evicts) requires the ring to actually hold
/// `N` live frames rather than `N - 1`. `next()` therefore wraps modulo
/// `N + 1`, not via a power-of-two bitmask.
pub struct RxRing<const N: usize> {
    head: AtomicUsize,
    tail: AtomicUsize,
    storage: UnsafeCell<[RingSlot; N + 1]>,
}

// Safety: `head`/`tail` are the only coordination between the producer and
// consumer, and every access to `storage` is guarded by the release/acquire
// protocol documented on `push`/`pop` below.
unsafe impl<const N: usize> Sync for RxRing<N> {}

impl<const N: usize> RxRing<N> {
    pub const fn new() -> Self {
        assert!(N.is_power_of_two(), "ring capacity must be a power of two");
        Self {
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            storage: UnsafeCell::new([RingSlot::EMPTY; N + 1]),
        }
    }

    const fn next(i: usize) -> usize {
        if i + 1 == N + 1 {
            0
        } else {
            i + 1
        }
    }

    /// Producer side: push a frame, never blocking.
    ///
    /// If the ring is full, the oldest slot is evicted (drop-oldest, spec
    /// §4.1) by advancing `tail` before the new slot is written. This is the
    /// one case where the producer is permitted to touch `tail`.
    pub fn push(&self, slot: RingSlot) {
        let head = self.head.load(Ordering::Relaxed);
        let tail = self.tail.load(Ordering::Acquire);
        let next_head = Self::next(head);
        if next_head == tail {
            ringbuf::ringbuf_entry!(RING_TRACE, RingEvent::EvictedOldest);
            counters::count!(RING_COUNTERS, RingEvent::EvictedOldest);
            self.tail.store(Self::next(tail), Ordering::Release);
        }
        // Safety: `head` is owned exclusively by the producer, and the
        // consumer only reads slot `tail`, which by construction never
        // equals `head` until the release-store below publishes it.
        unsafe {
            (*self.storage.get())[head] = slot;
        }
        self.head.store(next_head, Ordering::Release);
        ringbuf::ringbuf_entry!(RING_TRACE, RingEvent::Pushed);
    }

    /// Consumer side: pop the oldest frame, or `None` if the ring is empty.
    pub fn pop(&self) -> Option<RingSlot> {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Relaxed);
        if head == tail {
            return None;
        }
        // The acquire above pairs with `push`'s release, making the slot
        // contents at `tail` visible here.
        // Safety: `tail` is owned exclusively by the consumer (except for
        // the ISR's drop-oldest advance, which only ever moves it forward
        // past slots the consumer hasn't observed yet).
        let slot = unsafe { (*self.storage.get())[tail] };
        self.tail.store(Self::next(tail), Ordering::Release);
        ringbuf::ringbuf_entry!(RING_TRACE, RingEvent::Popped);
        Some(slot)
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }
}

impl<const N: usize> Default for RxRing<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer half of a split `RxRing`: callable from the ISR with only a
/// shared reference (spec §5).
pub struct RxProducer<'a, const N: usize> {
    ring: &'a RxRing<N>,
}

impl<const N: usize> RxProducer<'_, N> {
    pub fn push(&self, slot: RingSlot) {
        self.ring.push(slot);
    }
}

/// Consumer half of a split `RxRing`: owned exclusively by the worker.
pub struct RxConsumer<'a, const N: usize> {
    ring: &'a RxRing<N>,
}

impl<const N: usize> RxConsumer<'_, N> {
    pub fn pop(&mut self) -> Option<RingSlot> {
        self.ring.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

impl<const N: usize> RxRing<N> {
    /// Splits the ring into its producer and consumer halves. The borrow
    /// checker then statically prevents handing the producer half to more
    /// than one caller, and likewise for the consumer.
    pub fn split(&self) -> (RxProducer<'_, N>, RxConsumer<'_, N>) {
        (RxProducer { ring: self }, RxConsumer { ring: self })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(std_id: u16, tag: u8) -> RingSlot {
        let mut bytes = [0u8; 64];
        bytes[0] = tag;
        RingSlot {
            std_id,
            len: 1,
            bytes,
        }
    }

    #[test]
    fn fifo_order_when_not_full() {
        let ring: RxRing<64> = RxRing::new();
        for i in 0..10u8 {
            ring.push(frame(0x100, i));
        }
        for i in 0..10u8 {
            let popped = ring.pop().unwrap();
            assert_eq!(popped.bytes[0], i);
        }
        assert!(ring.pop().is_none());
    }

    #[test]
    fn overflow_drops_oldest() {
        let ring: RxRing<64> = RxRing::new();
        // Fill the ring with frames tagged 1..=64.
        for i in 1..=64u8 {
            ring.push(frame(0x100, i));
        }
        // Push #65 without any pop: frame #1 is evicted.
        ring.push(frame(0x100, 65));

        let first = ring.pop().unwrap();
        assert_eq!(first.bytes[0], 2, "frame #1 should have been dropped");

        let mut last = first;
        while let Some(s) = ring.pop() {
            last = s;
        }
        assert_eq!(last.bytes[0], 65);
    }
}
