// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compile-time knobs, spec §6. Every magic number in this crate should
//! trace back to one of these constants.

/// Depth of the ISR-to-worker RX ring. Must be a power of two.
pub const RING_DEPTH: usize = 64;

/// Number of concurrent in-progress reassemblies.
pub const REASSEMBLY_SLOTS: usize = 4;

/// Largest message this node will reassemble.
pub const REASSEMBLY_MAX_BYTES: usize = 2048;

/// Largest fragment count a message may be split into. Bounded by the width
/// of the reassembly bitmap (a `u64`).
pub const REASSEMBLY_MAX_FRAGS: usize = 64;

/// A reassembly slot with no activity for longer than this is reset.
pub const REASSEMBLY_TIMEOUT_MS: u64 = 250;

/// Fixed CAN-FD wire frame length used for fragment transport.
pub const FRAGMENT_WIRE_LEN: usize = 64;

/// Encoded size of `FragmentHeader`.
pub const FRAGMENT_HEADER_LEN: usize = 8;

/// Payload bytes carried per fragment.
pub const FRAGMENT_DATA_CAP: usize = FRAGMENT_WIRE_LEN - FRAGMENT_HEADER_LEN;

/// Magic value identifying a frame as a fragment (`FragmentHeader::magic`).
pub const FRAGMENT_MAGIC: u16 = 0x5344;

/// Raw subscriber table capacity.
pub const SUBSCRIBER_CAPACITY: usize = 8;

/// Maximum number of bus sides a router may own.
pub const SIDE_CAPACITY: usize = 8;

/// Maximum number of local endpoints a router may own.
pub const ENDPOINT_CAPACITY: usize = 16;

/// Depth of the router's TX and RX queues.
///
/// Not specified numerically in the source spec; chosen generously enough to
/// absorb a burst of queued samples between worker ticks without becoming a
/// de-facto unbounded queue. See `DESIGN.md`.
pub const QUEUE_DEPTH: usize = 16;

/// Largest serialized packet (envelope + payload) the router will move
/// through a queue.
pub const MAX_PACKET_LEN: usize = REASSEMBLY_MAX_BYTES + 16;

/// Time-sync request period.
pub const SYNC_PERIOD_MS: u64 = 2000;

/// Largest `|offset|` a time-sync reply may apply; larger corrections are
/// discarded as a spoof/bad-reply guard.
pub const SYNC_CLAMP_MS: i64 = 30_000;

/// Size of the single fixed byte-pool backing variable-length allocations.
pub const BYTE_POOL_SIZE: usize = 32 * 1024;

/// Granularity of the byte pool's block allocator.
pub const BYTE_POOL_BLOCK_SIZE: usize = 64;

/// Reserved local-endpoint tag for the SD-card sink.
pub const ENDPOINT_SD_CARD: u16 = 1;

/// Reserved local-endpoint tag for the time-sync client.
pub const ENDPOINT_TIME_SYNC: u16 = 2;

/// Packet type used for `log_error_*` payloads.
pub const PACKET_TYPE_GENERIC_ERROR: u16 = 0xFFFF;

/// Cap on a single formatted error message before silent truncation.
pub const ERROR_MESSAGE_CAP: usize = 512;
