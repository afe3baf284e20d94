// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Process-wide singleton handles for the RX ring, byte pool, and
//! reassembly table (spec §9, "Global mutable state").
//!
//! The ring and byte pool are already `Sync` (the ring's interior mutability
//! is atomics-guarded; the pool's is guarded by a `critical_section` around
//! every `alloc`/`free`), so they're plain `static`s. The reassembly
//! table needs `&mut self` for `feed`/`sweep_stale`, so it's parked behind a
//! [`static_cell::StaticCell`] the same way `oxidecomputer-hubris` tasks
//! hand out single-owner access to their ring buffers: the first
//! `reassembly_table()` call gets the only live `StaticRef`, and calling it
//! again while that guard is alive panics rather than aliasing.
//!
//! The router is deliberately not made a singleton here: it's generic over
//! the board-support layer's concrete `MonotonicClock` type, which this
//! crate doesn't know. A board-support crate wires its own
//! `static ROUTER: StaticCell<Router<'static, BoardClock>>` using the same
//! pattern.

use static_cell::{StaticCell, StaticRef};

use crate::config;
use crate::pool::NodeBytePool;
use crate::reassembly::ReassemblyTable;
use crate::ring::RxRing;

/// The ISR-to-worker frame queue, sized per `config::RING_DEPTH`.
pub static RX_RING: RxRing<{ config::RING_DEPTH }> = RxRing::new();

/// The fixed arena backing every packet `Router` stages through its TX/RX
/// queues (`Router::log_typed`, `Router::rx_serialized_from_side`), sized
/// per `config::BYTE_POOL_SIZE` / `config::BYTE_POOL_BLOCK_SIZE`. A
/// board-support crate passes `&BYTE_POOL` to `Router::new`.
pub static BYTE_POOL: NodeBytePool = NodeBytePool::new();

static REASSEMBLY_TABLE: StaticCell<ReassemblyTable<{ config::REASSEMBLY_SLOTS }>> =
    StaticCell::new(ReassemblyTable::new());

/// Hands out the single live handle to the reassembly table. Panics if
/// called a second time while the first handle is still in scope —
/// "forbid reinitialization/re-acquisition after first use" (spec §9).
pub fn reassembly_table() -> StaticRef<'static, ReassemblyTable<{ config::REASSEMBLY_SLOTS }>> {
    REASSEMBLY_TABLE.borrow_mut()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[should_panic]
    fn second_concurrent_acquire_panics() {
        let _first = reassembly_table();
        let _second = reassembly_table();
    }
}
