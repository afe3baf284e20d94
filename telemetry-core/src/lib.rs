// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CAN-FD fragmentation, reassembly, routing and time-sync core for
//! on-node telemetry.
//!
//! This crate is `no_std` outside tests: there is no host allocator and no
//! host console. All dynamic-length data lives in the fixed arena in
//! [`pool`]; diagnostics live in each module's own `ringbuf!` trace history
//! and `counters!` event counts, inspectable with a debugger rather than
//! printed.

#![cfg_attr(not(test), no_std)]

pub mod clock;
pub mod config;
pub mod error;
pub mod fragment;
pub mod pool;
pub mod reassembly;
pub mod ring;
pub mod router;
pub mod singleton;
pub mod subscriber;
pub mod timesync;
pub mod wire;
pub mod worker;

pub use clock::MonotonicClock;
pub use error::{die, DieHook, Error, Result, SpinDieHook};
pub use pool::{NodeBuf, NodeBytePool};
pub use ring::{RingSlot, RxConsumer, RxProducer, RxRing};
pub use router::{Mode, Router};

/// A write sink for the SD-card local endpoint (spec §6, "Storage interface
/// consumed"). May be a no-op stub.
pub trait StorageSink {
    fn write(&self, bytes: &[u8]) -> Result<()>;
}

/// A bus driver's transmit half (spec §6, "Bus driver interface consumed").
/// RX delivery is out of band: the board-support layer pushes received
/// frames into an [`RxProducer`] from its ISR.
pub trait BusDriver {
    fn send(&self, std_id: u16, bytes: &[u8]) -> Result<()>;
}

/// One schema-compiler-generated type table entry (spec §6, "Schema
/// interface consumed"): either a fixed element size/kind, or a string's
/// fixed pad width.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SchemaEntry {
    pub element_kind: wire::ElementKind,
    pub fixed_size_bytes: Option<u16>,
}

/// A schema lookup: `data_type -> SchemaEntry`. The schema compiler's
/// generated table is, from this crate's point of view, just a function
/// pointer supplied at `Router` construction time.
pub type SchemaTable = fn(u16) -> Option<SchemaEntry>;
