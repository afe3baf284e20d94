// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Four-timestamp NTP-style time-sync client, spec §4.6.

use core::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use zerocopy::byteorder::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config;
use crate::error::{Error, Result};

/// Trace events recorded by the time-sync client.
#[derive(Clone, Copy, PartialEq, Eq)]
enum SyncEvent {
    None,
    RequestSent,
    ReplyAccepted,
    /// A reply's computed offset exceeded `SYNC_CLAMP_MS` and was discarded.
    ReplyRejectedOutOfRange,
}

ringbuf::ringbuf!(SYNC_TRACE, SyncEvent, 16, SyncEvent::None);

/// Event counts paired with the trace buffer above.
pub struct SyncEventCounts {
    rejected_out_of_range: AtomicU32,
}

impl counters::Count for SyncEvent {
    type Counters = SyncEventCounts;
    const NEW_COUNTERS: Self::Counters = SyncEventCounts {
        rejected_out_of_range: AtomicU32::new(0),
    };

    fn count(&self, counters: &Self::Counters) {
        if let SyncEvent::ReplyRejectedOutOfRange = self {
            counters.rejected_out_of_range.fetch_add(1, Ordering::Relaxed);
        }
    }
}

counters::counters!(SYNC_COUNTERS, SyncEvent);

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SyncRequest {
    pub seq: U64,
    pub t1: U64,
}

#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct SyncReply {
    pub seq: U64,
    pub t1: U64,
    pub t2: U64,
    pub t3: U64,
}

/// Requestor side of the exchange. The client never serves requests; it only
/// issues them and processes replies.
///
/// `base_offset_ms` is an additive correction applied on top of whatever the
/// underlying `MonotonicClock` reports, so a correction is always a "base
/// offset update", never a backward step of the raw clock (spec §4.6).
pub struct TimeSyncClient {
    next_seq: AtomicU64,
    outstanding_t1: AtomicU64,
    base_offset_ms: AtomicI64,
}

impl TimeSyncClient {
    pub const fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(0),
            outstanding_t1: AtomicU64::new(0),
            base_offset_ms: AtomicI64::new(0),
        }
    }

    /// Applies the client's current correction to a raw monotonic reading.
    pub fn corrected_now_ms(&self, raw_now_ms: u64) -> u64 {
        let offset = self.base_offset_ms.load(Ordering::Relaxed);
        raw_now_ms.saturating_add_signed(offset)
    }

    /// Builds the next request; `t1` is the (corrected) send time.
    pub fn build_request(&self, raw_now_ms: u64) -> SyncRequest {
        let t1 = self.corrected_now_ms(raw_now_ms);
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.outstanding_t1.store(t1, Ordering::Relaxed);
        ringbuf::ringbuf_entry!(SYNC_TRACE, SyncEvent::RequestSent);
        SyncRequest {
            seq: U64::new(seq),
            t1: U64::new(t1),
        }
    }

    /// Processes a reply; `t4` is the (corrected) receive time, captured at
    /// the instant this is called (spec §4.6).
    ///
    /// Stale replies (`seq` older than the last request issued) are accepted
    /// per spec; this implementation follows the spec's default and accepts
    /// them rather than exercising the "implementations may reject" option.
    pub fn apply_reply(&self, reply: &SyncReply, raw_now_ms: u64) -> Result<i64> {
        let t1 = reply.t1.get();
        let t2 = reply.t2.get();
        let t3 = reply.t3.get();
        let t4 = self.corrected_now_ms(raw_now_ms);

        let offset = ((t2 as i64 - t1 as i64) + (t3 as i64 - t4 as i64)) / 2;
        let delay = core::cmp::max(0, (t4 as i64 - t1 as i64) - (t3 as i64 - t2 as i64));
        let _ = delay; // retained for diagnostics/future use, spec §4.6

        if offset.abs() > config::SYNC_CLAMP_MS {
            ringbuf::ringbuf_entry!(SYNC_TRACE, SyncEvent::ReplyRejectedOutOfRange);
            counters::count!(SYNC_COUNTERS, SyncEvent::ReplyRejectedOutOfRange);
            return Err(Error::BadArg);
        }

        self.base_offset_ms
            .fetch_add(offset, Ordering::Relaxed);
        ringbuf::ringbuf_entry!(SYNC_TRACE, SyncEvent::ReplyAccepted);
        Ok(offset)
    }
}

impl Default for TimeSyncClient {
    fn default() -> Self {
        Self::new()
    }
}
