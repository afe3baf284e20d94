// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A fixed-size byte arena backing every variable-length allocation in this
//! crate (serialized packet staging, formatted error strings).
//!
//! There is no host heap here: `BytePool` hands out contiguous runs of
//! `BLOCK_SIZE`-byte blocks from one `'static` array, tracked with a simple
//! used-bitmap (the same bitmap-over-fixed-array technique the reassembly
//! table uses for fragment tracking). Allocation never blocks and never
//! grows the arena; on exhaustion the caller gets `Error::Alloc` and is
//! expected to degrade (drop the packet, surface the error), per spec §5.
//!
//! The borrow-guard returned by `alloc` follows the same pattern as
//! `static_cell::StaticRef`: its `Drop` impl is what returns the blocks to
//! the free bitmap, so a leaked guard just means leaked pool space, never a
//! dangling reference.
//!
//! `alloc`/`free` may both be called from ISR context (a logging call can
//! originate from an interrupt) racing the worker thread, so the bitmap scan
//! and the free-list update each run inside `critical_section::with` rather
//! than relying on a single-caller assumption.

use core::cell::{Cell, UnsafeCell};
use core::ops::{Deref, DerefMut};

use crate::config;
use crate::error::{Error, Result};

/// `BLOCKS` blocks of `BLOCK_SIZE` bytes each, contiguous in memory.
pub struct BytePool<const BLOCKS: usize, const BLOCK_SIZE: usize> {
    used: [Cell<bool>; BLOCKS],
    backing: UnsafeCell<PoolStorage<BLOCKS, BLOCK_SIZE>>,
}

#[repr(C)]
struct PoolStorage<const BLOCKS: usize, const BLOCK_SIZE: usize> {
    bytes: [[u8; BLOCK_SIZE]; BLOCKS],
}

// Safety: all access goes through `BytePool::alloc`/`free`, which hand out
// and reclaim blocks under `critical_section::with`; the `Cell`/`UnsafeCell`
// interior mutability here is therefore never observed from two execution
// contexts simultaneously, even when a caller is an ISR racing the worker
// thread.
unsafe impl<const BLOCKS: usize, const BLOCK_SIZE: usize> Sync
    for BytePool<BLOCKS, BLOCK_SIZE>
{
}

impl<const BLOCKS: usize, const BLOCK_SIZE: usize> BytePool<BLOCKS, BLOCK_SIZE> {
    const USED_FALSE: Cell<bool> = Cell::new(false);

    pub const fn new() -> Self {
        Self {
            used: [Self::USED_FALSE; BLOCKS],
            backing: UnsafeCell::new(PoolStorage {
                bytes: [[0u8; BLOCK_SIZE]; BLOCKS],
            }),
        }
    }

    fn blocks_needed(len: usize) -> usize {
        (len + BLOCK_SIZE - 1) / BLOCK_SIZE
    }

    /// Allocates a zero-initialized buffer able to hold `len` bytes.
    ///
    /// First-fit over contiguous free blocks; `NO_WAIT` semantics (never
    /// blocks, never grows the arena). Returns `Error::Alloc` if no
    /// sufficiently long free run exists.
    pub fn alloc(&self, len: usize) -> Result<PoolBuf<'_, BLOCKS, BLOCK_SIZE>> {
        if len == 0 {
            return Err(Error::BadArg);
        }
        let need = Self::blocks_needed(len);
        if need > BLOCKS {
            return Err(Error::Alloc);
        }
        critical_section::with(|_| self.claim(need, len))
    }

    fn claim(&self, need: usize, len: usize) -> Result<PoolBuf<'_, BLOCKS, BLOCK_SIZE>> {
        let mut run_start = None;
        let mut run_len = 0usize;
        for i in 0..BLOCKS {
            if self.used[i].get() {
                run_start = None;
                run_len = 0;
                continue;
            }
            if run_start.is_none() {
                run_start = Some(i);
            }
            run_len += 1;
            if run_len == need {
                let start = run_start.unwrap();
                for b in &self.used[start..start + need] {
                    b.set(true);
                }
                // Safety: `start..start+need` was just marked used and no
                // other `PoolBuf` may alias it.
                let bytes = unsafe {
                    let base = (*self.backing.get()).bytes.as_mut_ptr();
                    core::slice::from_raw_parts_mut(
                        base.add(start) as *mut u8,
                        need * BLOCK_SIZE,
                    )
                };
                for b in bytes.iter_mut() {
                    *b = 0;
                }
                return Ok(PoolBuf {
                    pool: self,
                    start,
                    blocks: need,
                    len,
                    bytes,
                });
            }
        }
        Err(Error::Alloc)
    }

    fn free(&self, start: usize, blocks: usize) {
        critical_section::with(|_| {
            for b in &self.used[start..start + blocks] {
                b.set(false);
            }
        });
    }

    #[cfg(test)]
    fn free_blocks(&self) -> usize {
        self.used.iter().filter(|b| !b.get()).count()
    }
}

/// An in-use run of pool blocks, sized to exactly the requested byte length.
pub struct PoolBuf<'a, const BLOCKS: usize, const BLOCK_SIZE: usize> {
    pool: &'a BytePool<BLOCKS, BLOCK_SIZE>,
    start: usize,
    blocks: usize,
    len: usize,
    bytes: &'a mut [u8],
}

impl<const BLOCKS: usize, const BLOCK_SIZE: usize> Drop for PoolBuf<'_, BLOCKS, BLOCK_SIZE> {
    fn drop(&mut self) {
        self.pool.free(self.start, self.blocks);
    }
}

impl<const BLOCKS: usize, const BLOCK_SIZE: usize> Deref for PoolBuf<'_, BLOCKS, BLOCK_SIZE> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl<const BLOCKS: usize, const BLOCK_SIZE: usize> DerefMut for PoolBuf<'_, BLOCKS, BLOCK_SIZE> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[..self.len]
    }
}

/// The concrete shape of the single node-wide byte pool (spec §6: ring
/// depth, reassembly slots etc. are all per-node compile-time knobs; this
/// one is no different). Named so callers outside this module — `router.rs`'s
/// packet staging, `singleton.rs`'s static — don't each restate the
/// `BYTE_POOL_SIZE / BYTE_POOL_BLOCK_SIZE` arithmetic.
pub type NodeBytePool = BytePool<
    { config::BYTE_POOL_SIZE / config::BYTE_POOL_BLOCK_SIZE },
    { config::BYTE_POOL_BLOCK_SIZE },
>;

/// A buffer borrowed from [`NodeBytePool`].
pub type NodeBuf<'a> = PoolBuf<
    'a,
    { config::BYTE_POOL_SIZE / config::BYTE_POOL_BLOCK_SIZE },
    { config::BYTE_POOL_BLOCK_SIZE },
>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_free_roundtrip() {
        let pool: BytePool<8, 64> = BytePool::new();
        assert_eq!(pool.free_blocks(), 8);
        {
            let mut buf = pool.alloc(100).unwrap(); // needs 2 blocks
            assert_eq!(buf.len(), 100);
            assert_eq!(pool.free_blocks(), 6);
            buf[0] = 0xAA;
            buf[99] = 0xBB;
            assert_eq!(buf[0], 0xAA);
        }
        assert_eq!(pool.free_blocks(), 8);
    }

    #[test]
    fn exhaustion_returns_alloc_error() {
        let pool: BytePool<4, 64> = BytePool::new();
        let _a = pool.alloc(64).unwrap();
        let _b = pool.alloc(64).unwrap();
        let _c = pool.alloc(64).unwrap();
        let _d = pool.alloc(64).unwrap();
        assert_eq!(pool.alloc(1), Err(Error::Alloc));
    }

    #[test]
    fn zero_length_is_bad_arg() {
        let pool: BytePool<4, 64> = BytePool::new();
        assert_eq!(pool.alloc(0), Err(Error::BadArg));
    }
}
