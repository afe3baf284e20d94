// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Router packet envelope encode/decode, spec §4.5 "Serialization wire
//! format".

use zerocopy::byteorder::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::config;
use crate::error::{Error, Result};

/// A typed-log call's element kind, packed into `EnvelopeHeader::flags` bits 0-2.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ElementKind {
    Unsigned = 0,
    Signed = 1,
    Float = 2,
    Bool = 3,
    String = 4,
}

impl ElementKind {
    fn from_bits(bits: u8) -> Result<Self> {
        Ok(match bits {
            0 => Self::Unsigned,
            1 => Self::Signed,
            2 => Self::Float,
            3 => Self::Bool,
            4 => Self::String,
            _ => return Err(Error::BadArg),
        })
    }
}

/// The source's heuristic for inferring `element_kind` from `element_size`
/// alone (4 or 8 bytes ⇒ FLOAT). Retained for migrating callers; every
/// `Router` logging entry point takes an explicit `ElementKind` instead.
#[deprecated(note = "pass an explicit ElementKind instead")]
pub fn infer_kind_from_size(element_size: u8) -> ElementKind {
    match element_size {
        4 | 8 => ElementKind::Float,
        _ => ElementKind::Unsigned,
    }
}

/// `{u16 type, u16 flags, u32 timestamp_ms, u16 payload_len}`, little-endian.
///
/// `flags` bits 0-2 carry `ElementKind`; bits 3-5 carry `log2(element_size)`.
#[repr(C, packed)]
#[derive(
    Clone, Copy, PartialEq, Eq, Debug, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned,
)]
pub struct EnvelopeHeader {
    pub data_type: U16,
    pub flags: U16,
    pub timestamp_ms: U32,
    pub payload_len: U16,
}

pub const ENVELOPE_HEADER_LEN: usize = core::mem::size_of::<EnvelopeHeader>();

impl EnvelopeHeader {
    pub fn kind(&self) -> Result<ElementKind> {
        ElementKind::from_bits((self.flags.get() & 0x7) as u8)
    }

    pub fn element_size_log2(&self) -> u8 {
        ((self.flags.get() >> 3) & 0x7) as u8
    }

    pub fn pack_flags(kind: ElementKind, element_size: u8) -> u16 {
        let log2 = 7 - element_size.max(1).leading_zeros();
        (kind as u16) | ((log2 as u16 & 0x7) << 3)
    }
}

/// Serializes an envelope + payload into `out`, returning the total bytes
/// written. `Error::BadArg` if `out` is too small.
pub fn encode_envelope(
    data_type: u16,
    kind: ElementKind,
    element_size: u8,
    timestamp_ms: u32,
    payload: &[u8],
    out: &mut [u8],
) -> Result<usize> {
    if payload.len() > config::MAX_PACKET_LEN {
        return Err(Error::SizeMismatch);
    }
    let total = ENVELOPE_HEADER_LEN + payload.len();
    if out.len() < total {
        return Err(Error::BadArg);
    }
    let header = EnvelopeHeader {
        data_type: U16::new(data_type),
        flags: U16::new(EnvelopeHeader::pack_flags(kind, element_size)),
        timestamp_ms: U32::new(timestamp_ms),
        payload_len: U16::new(payload.len() as u16),
    };
    out[..ENVELOPE_HEADER_LEN].copy_from_slice(header.as_bytes());
    out[ENVELOPE_HEADER_LEN..total].copy_from_slice(payload);
    Ok(total)
}

/// Decodes an envelope header plus payload slice out of `bytes`.
pub fn decode_envelope(bytes: &[u8]) -> Result<(EnvelopeHeader, &[u8])> {
    if bytes.len() < ENVELOPE_HEADER_LEN {
        return Err(Error::BadArg);
    }
    let header = EnvelopeHeader::read_from_bytes(&bytes[..ENVELOPE_HEADER_LEN])
        .map_err(|_| Error::Internal)?;
    let payload_len = header.payload_len.get() as usize;
    let end = ENVELOPE_HEADER_LEN + payload_len;
    if bytes.len() < end {
        return Err(Error::SizeMismatch);
    }
    Ok((header, &bytes[ENVELOPE_HEADER_LEN..end]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trip() {
        let mut buf = [0u8; 64];
        let payload = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let n = encode_envelope(0x42, ElementKind::Float, 4, 1_000, &payload, &mut buf).unwrap();

        let (header, decoded_payload) = decode_envelope(&buf[..n]).unwrap();
        assert_eq!({ header.data_type.get() }, 0x42);
        assert_eq!({ header.timestamp_ms.get() }, 1_000);
        assert_eq!(header.kind().unwrap(), ElementKind::Float);
        assert_eq!(header.element_size_log2(), 2);
        assert_eq!(decoded_payload, &payload);
    }

    #[test]
    fn decode_rejects_truncated_payload() {
        let mut buf = [0u8; 64];
        let payload = [0u8; 8];
        let n = encode_envelope(0, ElementKind::Unsigned, 1, 0, &payload, &mut buf).unwrap();
        assert_eq!(decode_envelope(&buf[..n - 1]), Err(Error::SizeMismatch));
    }

    #[test]
    fn encode_rejects_oversized_payload() {
        let big = [0u8; config::MAX_PACKET_LEN + 1];
        let mut out = [0u8; 16];
        assert_eq!(
            encode_envelope(0, ElementKind::Unsigned, 1, 0, &big, &mut out),
            Err(Error::SizeMismatch)
        );
    }
}
