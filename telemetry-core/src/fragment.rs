// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CAN-FD DLC ↔ length tables and the fragment header codec, spec §4.2.

use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config;
use crate::error::{Error, Result};

/// CAN-FD payload lengths, indexed by their 4-bit DLC code.
pub const DLC_LEN_TABLE: [u8; 16] =
    [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

/// Maps a DLC code (0..=15) to its payload length.
pub fn dlc_to_len(dlc: u8) -> Result<u8> {
    DLC_LEN_TABLE.get(dlc as usize).copied().ok_or(Error::BadArg)
}

/// Maps a payload length to its DLC code; only exact table entries are valid.
pub fn len_to_dlc(len: u8) -> Result<u8> {
    DLC_LEN_TABLE
        .iter()
        .position(|&l| l == len)
        .map(|i| i as u8)
        .ok_or(Error::BadArg)
}

/// Rounds `len` up to the next CAN-FD table entry, for zero-padding a
/// partially-filled wire frame.
pub fn round_up_len(len: u8) -> Result<u8> {
    DLC_LEN_TABLE
        .iter()
        .copied()
        .find(|&l| l >= len)
        .ok_or(Error::BadArg)
}

bitflags::bitflags! {
    /// `FragmentHeader::flags` bits.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct FragmentFlags: u8 {
        const FIRST = 1 << 0;
        const LAST = 1 << 1;
    }
}

/// The 8-byte little-endian fragment header, spec §3/§4.2.
///
/// Invariant: `frag_idx < frag_cnt`.
#[repr(C, packed)]
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct FragmentHeader {
    pub magic: U16,
    pub seq: u8,
    pub frag_idx: u8,
    pub frag_cnt: u8,
    pub flags: u8,
    pub total_len: U16,
}

impl FragmentHeader {
    pub fn is_first(&self) -> bool {
        FragmentFlags::from_bits_truncate(self.flags).contains(FragmentFlags::FIRST)
    }

    pub fn is_last(&self) -> bool {
        FragmentFlags::from_bits_truncate(self.flags).contains(FragmentFlags::LAST)
    }

    pub fn encode(&self, out: &mut [u8; config::FRAGMENT_HEADER_LEN]) {
        out.copy_from_slice(self.as_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::read_from_bytes(bytes).map_err(|_| Error::BadArg)
    }
}

/// A frame is a fragment iff it's at least header-sized and carries the
/// fragment magic (spec §4.2, "Defragmentation decision").
pub fn is_fragment(bytes: &[u8]) -> bool {
    bytes.len() >= config::FRAGMENT_HEADER_LEN
        && u16::from_le_bytes([bytes[0], bytes[1]]) == config::FRAGMENT_MAGIC
}

/// One wire-ready 64-byte CAN-FD frame produced by `Fragmenter`.
#[derive(Clone, Copy)]
pub struct FragmentFrame {
    pub bytes: [u8; config::FRAGMENT_WIRE_LEN],
}

/// Splits a payload into fixed 64-byte wire frames.
///
/// Iterates lazily so a caller can transmit each frame as it's produced and
/// abort on the first bus error without having staged every frame in memory
/// first (spec §4.2: "Failure to transmit any fragment aborts the send").
pub struct Fragmenter<'p> {
    payload: &'p [u8],
    seq: u8,
    frag_cnt: u8,
    idx: u8,
}

impl<'p> Fragmenter<'p> {
    pub fn new(payload: &'p [u8], seq: u8) -> Result<Self> {
        if payload.is_empty() || payload.len() > u16::MAX as usize {
            return Err(Error::BadArg);
        }
        let data_cap = config::FRAGMENT_DATA_CAP;
        let frag_cnt = payload.len().div_ceil(data_cap);
        if frag_cnt == 0 || frag_cnt > 255 || frag_cnt > config::REASSEMBLY_MAX_FRAGS {
            return Err(Error::BadArg);
        }
        Ok(Self {
            payload,
            seq,
            frag_cnt: frag_cnt as u8,
            idx: 0,
        })
    }

    pub fn frag_cnt(&self) -> u8 {
        self.frag_cnt
    }
}

impl Iterator for Fragmenter<'_> {
    type Item = FragmentFrame;

    fn next(&mut self) -> Option<FragmentFrame> {
        if self.idx >= self.frag_cnt {
            return None;
        }
        let data_cap = config::FRAGMENT_DATA_CAP;
        let off = self.idx as usize * data_cap;
        let take = core::cmp::min(data_cap, self.payload.len() - off);

        let mut flags = FragmentFlags::empty();
        if self.idx == 0 {
            flags |= FragmentFlags::FIRST;
        }
        if self.idx == self.frag_cnt - 1 {
            flags |= FragmentFlags::LAST;
        }

        let header = FragmentHeader {
            magic: U16::new(config::FRAGMENT_MAGIC),
            seq: self.seq,
            frag_idx: self.idx,
            frag_cnt: self.frag_cnt,
            flags: flags.bits(),
            total_len: U16::new(self.payload.len() as u16),
        };

        let mut bytes = [0u8; config::FRAGMENT_WIRE_LEN];
        bytes[..config::FRAGMENT_HEADER_LEN].copy_from_slice(header.as_bytes());
        bytes[config::FRAGMENT_HEADER_LEN..config::FRAGMENT_HEADER_LEN + take]
            .copy_from_slice(&self.payload[off..off + take]);

        self.idx += 1;
        Some(FragmentFrame { bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dlc_round_trip() {
        for dlc in 0u8..16 {
            let len = dlc_to_len(dlc).unwrap();
            assert_eq!(len_to_dlc(len).unwrap(), dlc);
        }
    }

    #[test]
    fn dlc_to_len_rejects_out_of_range() {
        assert_eq!(dlc_to_len(16), Err(Error::BadArg));
    }

    #[test]
    fn round_up_len_rounds_to_table_entry() {
        assert_eq!(round_up_len(9).unwrap(), 12);
        assert_eq!(round_up_len(64).unwrap(), 64);
        assert_eq!(round_up_len(65), Err(Error::BadArg));
    }

    #[test]
    fn header_round_trip() {
        let header = FragmentHeader {
            magic: U16::new(config::FRAGMENT_MAGIC),
            seq: 7,
            frag_idx: 2,
            frag_cnt: 5,
            flags: FragmentFlags::LAST.bits(),
            total_len: U16::new(300),
        };
        let mut bytes = [0u8; config::FRAGMENT_HEADER_LEN];
        header.encode(&mut bytes);
        let decoded = FragmentHeader::decode(&bytes).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_last());
        assert!(!decoded.is_first());
    }

    #[test]
    fn fragmenting_150_bytes_yields_three_frames() {
        let payload: heapless::Vec<u8, 150> = (0..150u16).map(|b| b as u8).collect();
        let frames: heapless::Vec<FragmentFrame, 8> =
            Fragmenter::new(&payload, 3).unwrap().collect();
        assert_eq!(frames.len(), 3);

        let h0 = FragmentHeader::decode(&frames[0].bytes).unwrap();
        assert_eq!({ h0.frag_idx }, 0);
        assert_eq!({ h0.frag_cnt }, 3);
        assert!(h0.is_first());
        assert!(!h0.is_last());
        assert_eq!({ h0.total_len.get() }, 150);

        let h2 = FragmentHeader::decode(&frames[2].bytes).unwrap();
        assert!(h2.is_last());
        // Last fragment carries 150 - 2*56 = 38 payload bytes, zero-padded
        // to fill the rest of the 64-byte wire frame.
        assert_eq!(&frames[2].bytes[8 + 38..], &[0u8; 64 - 8 - 38][..]);
    }

    #[test]
    fn rejects_frag_cnt_above_max_frags() {
        let payload = [0u8; config::FRAGMENT_DATA_CAP * (config::REASSEMBLY_MAX_FRAGS + 1)];
        assert_eq!(Fragmenter::new(&payload, 0).err(), Some(Error::BadArg));
    }
}
