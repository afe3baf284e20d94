// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The multi-slot reassembly table, spec §4.3.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::config;
use crate::error::{Error, Result};
use crate::fragment::FragmentHeader;

#[derive(Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Collecting,
}

/// Trace events recorded by the reassembly table.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ReassemblyEvent {
    None,
    /// A slot was freshly claimed for `std_id`.
    Claimed,
    /// A slot was reused for a new message after its `seq` changed.
    Reset,
    /// A slot timed out with no activity for `REASSEMBLY_TIMEOUT_MS`.
    StaleExpired,
    /// A fragment was rejected outright: header validation failed, or a
    /// repeated `seq` disagreed on `frag_cnt`/`total_len` (a corrupted or
    /// conflicting header, not a new message).
    RejectedHeader,
    /// A message completed and was handed to subscribers.
    Delivered,
}

ringbuf::ringbuf!(REASSEMBLY_TRACE, ReassemblyEvent, 32, ReassemblyEvent::None);

/// Event counts paired with the trace buffer above.
pub struct ReassemblyEventCounts {
    stale_resets: AtomicU32,
    reset_reclaims: AtomicU32,
    rejected: AtomicU32,
}

impl counters::Count for ReassemblyEvent {
    type Counters = ReassemblyEventCounts;
    const NEW_COUNTERS: Self::Counters = ReassemblyEventCounts {
        stale_resets: AtomicU32::new(0),
        reset_reclaims: AtomicU32::new(0),
        rejected: AtomicU32::new(0),
    };

    fn count(&self, counters: &Self::Counters) {
        match self {
            ReassemblyEvent::StaleExpired => {
                counters.stale_resets.fetch_add(1, Ordering::Relaxed);
            }
            ReassemblyEvent::Reset => {
                counters.reset_reclaims.fetch_add(1, Ordering::Relaxed);
            }
            ReassemblyEvent::RejectedHeader => {
                counters.rejected.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

counters::counters!(REASSEMBLY_COUNTERS, ReassemblyEvent);

/// One in-progress (or free) reassembly buffer.
///
/// `claims` is a diagnostic-only generation counter: how many times this slot
/// has been claimed since boot. It has no bearing on protocol behavior.
pub struct ReassemblySlot {
    state: SlotState,
    std_id: u16,
    seq: u8,
    frag_cnt: u8,
    total_len: u16,
    data_cap: u16,
    got_bitmap: u64,
    got_count: u8,
    last_activity_ms: u64,
    buf: [u8; config::REASSEMBLY_MAX_BYTES],
    pub claims: u32,
}

impl ReassemblySlot {
    const fn new() -> Self {
        Self {
            state: SlotState::Free,
            std_id: 0,
            seq: 0,
            frag_cnt: 0,
            total_len: 0,
            data_cap: 0,
            got_bitmap: 0,
            got_count: 0,
            last_activity_ms: 0,
            buf: [0u8; config::REASSEMBLY_MAX_BYTES],
            claims: 0,
        }
    }

    fn is_free(&self) -> bool {
        matches!(self.state, SlotState::Free)
    }

    fn reset(&mut self) {
        self.state = SlotState::Free;
        self.got_bitmap = 0;
        self.got_count = 0;
    }

    fn claim(&mut self, std_id: u16, header: &FragmentHeader, now_ms: u64) {
        self.state = SlotState::Collecting;
        self.std_id = std_id;
        self.seq = header.seq;
        self.frag_cnt = header.frag_cnt;
        self.total_len = header.total_len.get();
        self.data_cap = 0; // fixed once the first fragment's payload length is known
        self.got_bitmap = 0;
        self.got_count = 0;
        self.last_activity_ms = now_ms;
        self.claims = self.claims.saturating_add(1);
    }
}

/// Outcome of feeding one fragment into the table.
pub enum FeedResult<'a> {
    /// The fragment was accepted; the message is still incomplete.
    Accepted,
    /// The fragment completed the message; `bytes` is the full payload.
    Delivered(&'a [u8]),
    /// The fragment was rejected outright (bad header).
    Rejected,
}

/// `SLOTS` concurrent in-progress reassemblies, each capped at `MAX_FRAGS`
/// fragments.
pub struct ReassemblyTable<const SLOTS: usize> {
    slots: [ReassemblySlot; SLOTS],
}

impl<const SLOTS: usize> ReassemblyTable<SLOTS> {
    pub const fn new() -> Self {
        const EMPTY: ReassemblySlot = ReassemblySlot::new();
        Self {
            slots: [EMPTY; SLOTS],
        }
    }

    /// Resets any slot with no activity for longer than
    /// `config::REASSEMBLY_TIMEOUT_MS`. Run once per worker tick, before
    /// processing the next fragment (spec §4.3, "Staleness sweep").
    pub fn sweep_stale(&mut self, now_ms: u64) {
        for slot in self.slots.iter_mut() {
            if !slot.is_free() && now_ms.saturating_sub(slot.last_activity_ms) > config::REASSEMBLY_TIMEOUT_MS
            {
                slot.reset();
                ringbuf::ringbuf_entry!(REASSEMBLY_TRACE, ReassemblyEvent::StaleExpired);
                counters::count!(REASSEMBLY_COUNTERS, ReassemblyEvent::StaleExpired);
            }
        }
    }

    /// Feeds one fragment (spec §4.3 steps 1-6). `std_id` identifies the
    /// sender; `header`/`payload` come from the already-decoded wire frame.
    pub fn feed(&mut self, std_id: u16, header: &FragmentHeader, payload: &[u8], now_ms: u64) -> FeedResult<'_> {
        let frag_cnt = header.frag_cnt;
        let frag_idx = header.frag_idx;
        let total_len = header.total_len.get();
        if frag_cnt == 0
            || frag_idx >= frag_cnt
            || frag_cnt as usize > config::REASSEMBLY_MAX_FRAGS
            || total_len == 0
            || total_len as usize > config::REASSEMBLY_MAX_BYTES
        {
            ringbuf::ringbuf_entry!(REASSEMBLY_TRACE, ReassemblyEvent::RejectedHeader);
            counters::count!(REASSEMBLY_COUNTERS, ReassemblyEvent::RejectedHeader);
            return FeedResult::Rejected;
        }

        let Some(idx) = self.locate_slot(std_id, header, now_ms) else {
            return FeedResult::Rejected;
        };
        let slot = &mut self.slots[idx];

        let data_cap = if slot.data_cap == 0 {
            slot.data_cap = payload.len() as u16;
            slot.data_cap
        } else {
            slot.data_cap
        };

        let off = frag_idx as usize * data_cap as usize;
        if off >= total_len as usize {
            ringbuf::ringbuf_entry!(REASSEMBLY_TRACE, ReassemblyEvent::RejectedHeader);
            counters::count!(REASSEMBLY_COUNTERS, ReassemblyEvent::RejectedHeader);
            return FeedResult::Rejected;
        }
        let take = core::cmp::min(payload.len(), total_len as usize - off);

        let bit = 1u64 << frag_idx;
        if slot.got_bitmap & bit == 0 {
            slot.got_bitmap |= bit;
            slot.got_count += 1;
            slot.buf[off..off + take].copy_from_slice(&payload[..take]);
        }
        slot.last_activity_ms = now_ms;

        if slot.got_count == slot.frag_cnt {
            let len = slot.total_len as usize;
            slot.reset();
            ringbuf::ringbuf_entry!(REASSEMBLY_TRACE, ReassemblyEvent::Delivered);
            FeedResult::Delivered(&slot.buf[..len])
        } else {
            FeedResult::Accepted
        }
    }

    /// Slot selection, spec §4.3 step 2: first active slot matching
    /// `std_id` (reset-and-reuse on a `seq` change), else any FREE slot,
    /// else the slot with the oldest activity. `None` means the fragment was
    /// rejected outright: a same-`seq` re-entry into an in-progress slot
    /// that disagrees on `frag_cnt`/`total_len` is a corrupted or
    /// conflicting header, not a new message, so the slot is reset and the
    /// fragment dropped rather than claimed fresh.
    fn locate_slot(&mut self, std_id: u16, header: &FragmentHeader, now_ms: u64) -> Option<usize> {
        if let Some(i) = self
            .slots
            .iter()
            .position(|s| !s.is_free() && s.std_id == std_id)
        {
            let slot = &mut self.slots[i];
            if slot.seq != header.seq {
                slot.reset();
                ringbuf::ringbuf_entry!(REASSEMBLY_TRACE, ReassemblyEvent::Reset);
                counters::count!(REASSEMBLY_COUNTERS, ReassemblyEvent::Reset);
                slot.claim(std_id, header, now_ms);
                ringbuf::ringbuf_entry!(REASSEMBLY_TRACE, ReassemblyEvent::Claimed);
                return Some(i);
            }
            if slot.frag_cnt != header.frag_cnt || slot.total_len != header.total_len.get() {
                slot.reset();
                ringbuf::ringbuf_entry!(REASSEMBLY_TRACE, ReassemblyEvent::RejectedHeader);
                counters::count!(REASSEMBLY_COUNTERS, ReassemblyEvent::RejectedHeader);
                return None;
            }
            return Some(i);
        }

        if let Some(i) = self.slots.iter().position(|s| s.is_free()) {
            self.slots[i].claim(std_id, header, now_ms);
            ringbuf::ringbuf_entry!(REASSEMBLY_TRACE, ReassemblyEvent::Claimed);
            return Some(i);
        }

        let i = self
            .slots
            .iter()
            .enumerate()
            .max_by_key(|(_, s)| now_ms.saturating_sub(s.last_activity_ms))
            .map(|(i, _)| i)
            .expect("SLOTS > 0");
        self.slots[i].claim(std_id, header, now_ms);
        ringbuf::ringbuf_entry!(REASSEMBLY_TRACE, ReassemblyEvent::Claimed);
        Some(i)
    }
}

impl<const SLOTS: usize> Default for ReassemblyTable<SLOTS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::Fragmenter;
    use zerocopy::byteorder::little_endian::U16;

    fn decode(frame: &[u8]) -> (FragmentHeader, &[u8]) {
        let header = FragmentHeader::decode(&frame[..config::FRAGMENT_HEADER_LEN]).unwrap();
        (header, &frame[config::FRAGMENT_HEADER_LEN..])
    }

    #[test]
    fn three_fragment_message_reassembles_in_order() {
        let payload: heapless::Vec<u8, 150> = (0..150u16).map(|b| b as u8).collect();
        let frames: heapless::Vec<_, 8> = Fragmenter::new(&payload, 3).unwrap().collect();

        let mut table: ReassemblyTable<4> = ReassemblyTable::new();
        let mut delivered: Option<heapless::Vec<u8, 150>> = None;
        for f in &frames {
            let (header, body) = decode(&f.bytes);
            match table.feed(0x100, &header, body, 0) {
                FeedResult::Delivered(bytes) => {
                    delivered = Some(heapless::Vec::from_slice(bytes).unwrap());
                }
                FeedResult::Accepted => {}
                FeedResult::Rejected => panic!("unexpected rejection"),
            }
        }
        assert_eq!(delivered.as_deref(), Some(&payload[..]));
    }

    #[test]
    fn out_of_order_fragments_reassemble() {
        let payload: heapless::Vec<u8, 150> = (0..150u16).map(|b| b as u8).collect();
        let frames: heapless::Vec<_, 8> = Fragmenter::new(&payload, 7).unwrap().collect();
        let order = [2usize, 0, 1];

        let mut table: ReassemblyTable<4> = ReassemblyTable::new();
        let mut delivered = None;
        for &i in &order {
            let (header, body) = decode(&frames[i].bytes);
            match table.feed(0x100, &header, body, 0) {
                FeedResult::Delivered(bytes) => {
                    delivered = Some(heapless::Vec::<u8, 150>::from_slice(bytes).unwrap());
                }
                FeedResult::Accepted => {}
                FeedResult::Rejected => panic!("unexpected rejection"),
            }
        }
        assert_eq!(delivered.as_deref(), Some(&payload[..]));
    }

    #[test]
    fn stale_slot_resets_before_251ms() {
        let payload: heapless::Vec<u8, 150> = (0..150u16).map(|b| b as u8).collect();
        let frames: heapless::Vec<_, 8> = Fragmenter::new(&payload, 1).unwrap().collect();

        let mut table: ReassemblyTable<4> = ReassemblyTable::new();
        let (h0, b0) = decode(&frames[0].bytes);
        assert!(matches!(table.feed(0x100, &h0, b0, 0), FeedResult::Accepted));

        table.sweep_stale(300);

        let (h1, b1) = decode(&frames[1].bytes);
        // frame 1 claims the slot fresh, since frame 0's progress was wiped.
        match table.feed(0x100, &h1, b1, 300) {
            FeedResult::Accepted => {}
            FeedResult::Delivered(_) => panic!("should not complete from a single fragment"),
            FeedResult::Rejected => panic!("frag_idx 1 is a valid header"),
        }
    }

    #[test]
    fn bad_header_is_rejected() {
        let mut table: ReassemblyTable<4> = ReassemblyTable::new();
        let header = FragmentHeader {
            magic: U16::new(config::FRAGMENT_MAGIC),
            seq: 0,
            frag_idx: 0,
            frag_cnt: 0,
            flags: 0,
            total_len: U16::new(10),
        };
        assert!(matches!(
            table.feed(0x100, &header, &[0u8; 8], 0),
            FeedResult::Rejected
        ));
    }

    #[test]
    fn same_seq_conflicting_header_is_rejected_not_reclaimed() {
        let payload: heapless::Vec<u8, 150> = (0..150u16).map(|b| b as u8).collect();
        let frames: heapless::Vec<_, 8> = Fragmenter::new(&payload, 3).unwrap().collect();

        let mut table: ReassemblyTable<4> = ReassemblyTable::new();
        let (h0, b0) = decode(&frames[0].bytes);
        assert!(matches!(table.feed(0x100, &h0, b0, 0), FeedResult::Accepted));

        // Same sender, same seq, but a header claiming a different
        // frag_cnt/total_len: a corrupted or conflicting header, not a new
        // message. Must be rejected, not silently accepted into a fresh
        // claim of the same slot.
        let mut conflicting = h0;
        conflicting.frag_cnt = h0.frag_cnt + 1;
        assert!(matches!(
            table.feed(0x100, &conflicting, b0, 1),
            FeedResult::Rejected
        ));

        // The slot was reset by the rejection, so the original message's
        // remaining fragments can no longer complete it.
        let (h1, b1) = decode(&frames[1].bytes);
        match table.feed(0x100, &h1, b1, 2) {
            FeedResult::Accepted => {}
            FeedResult::Delivered(_) => panic!("should not complete from a single fragment"),
            FeedResult::Rejected => panic!("frag_idx 1 is a valid header"),
        }
    }

    #[test]
    fn duplicate_fragment_is_idempotent() {
        let payload: heapless::Vec<u8, 56> = (0..56u16).map(|b| b as u8).collect();
        let frames: heapless::Vec<_, 1> = Fragmenter::new(&payload, 9).unwrap().collect();
        let (header, body) = decode(&frames[0].bytes);

        let mut table: ReassemblyTable<4> = ReassemblyTable::new();
        match table.feed(0x100, &header, body, 0) {
            FeedResult::Delivered(bytes) => assert_eq!(bytes, &payload[..]),
            _ => panic!("single fragment message should complete immediately"),
        }
        // Feeding the same single-fragment message again claims a fresh slot
        // and completes again; this exercises re-delivery rather than the
        // duplicate-within-one-message path (single-fragment messages leave
        // no partial state to duplicate against).
        match table.feed(0x100, &header, body, 0) {
            FeedResult::Delivered(bytes) => assert_eq!(bytes, &payload[..]),
            _ => panic!("expected delivery"),
        }
    }
}
