//! Variable-length ACK-ID field codec.
//!
//! A reliable message id is 20 bits, per stream, wrapping modulo 2^20.
//! On the wire the id travels in one to three bytes:
//!
//! ```text
//!  0 1 2 3 4 5 6 7 8 9 a b c d e f 0 1 2 3 4 5 6 7
//! <-- LSB --------------------------------- MSB -->
//! | S | IDA (5) |C|   IDB (7)   |C|  IDC (8)      |
//! ```
//!
//! `S` selects the stream, `C` continues into the next byte. The receiver
//! reconstructs the full id relative to the id it currently expects on that
//! stream, picking the candidate nearest to the expectation so ids survive
//! wrap. On retransmission the sender always uses the full three-byte form
//! because the receiver's expectation is unknown.

use crate::core::constants::{ACK_ID_BITS, ACK_ID_MASK};
use crate::core::error::WireError;
use crate::wire::header::StreamMode;

/// Longest encoded ACK-ID field.
pub const MAX_ACK_ID_BYTES: usize = 3;

/// Decoded ACK-ID field before reconstruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckIdField {
    /// Stream selector.
    pub stream: StreamMode,
    /// Transmitted low bits of the id.
    pub partial: u32,
    /// How many id bits were transmitted (5, 12, or 20).
    pub bits: u32,
}

/// Id bits carried by an encoding of `bytes` length.
fn bits_for_len(bytes: usize) -> u32 {
    match bytes {
        1 => 5,
        2 => 12,
        _ => ACK_ID_BITS,
    }
}

/// Number of bytes needed so that a receiver expecting any id in
/// `[reference, id]` reconstructs `id` exactly.
pub fn encoded_len(id: u32, reference: u32) -> usize {
    let ahead = id.wrapping_sub(reference) & ACK_ID_MASK;
    if ahead < (1 << 5) / 2 {
        1
    } else if ahead < (1 << 12) / 2 {
        2
    } else {
        3
    }
}

/// Append the ACK-ID field for `(stream, id)` using exactly `len` bytes.
pub fn encode(stream: StreamMode, id: u32, len: usize, out: &mut Vec<u8>) {
    let id = id & ACK_ID_MASK;
    let more0 = len > 1;
    out.push(stream as u8 | (((id & 0x1f) as u8) << 2) | if more0 { 0x80 } else { 0 });
    if more0 {
        let more1 = len > 2;
        out.push((((id >> 5) & 0x7f) as u8) | if more1 { 0x80 } else { 0 });
        if more1 {
            out.push(((id >> 12) & 0xff) as u8);
        }
    }
}

/// Decode an ACK-ID field from the front of `bytes`.
///
/// Returns the field and the number of bytes consumed.
pub fn decode(bytes: &[u8]) -> Result<(AckIdField, usize), WireError> {
    if bytes.is_empty() {
        return Err(WireError::Truncated { expected: 1, actual: 0 });
    }
    let b0 = bytes[0];
    // The selector occupies two bits, so from_index cannot fail here.
    let stream = StreamMode::from_index(b0 & 0x03).unwrap_or(StreamMode::Unordered);
    let mut partial = ((b0 >> 2) & 0x1f) as u32;
    let mut consumed = 1;
    if b0 & 0x80 != 0 {
        if bytes.len() < 2 {
            return Err(WireError::Truncated { expected: 2, actual: bytes.len() });
        }
        let b1 = bytes[1];
        partial |= ((b1 & 0x7f) as u32) << 5;
        consumed = 2;
        if b1 & 0x80 != 0 {
            if bytes.len() < 3 {
                return Err(WireError::Truncated { expected: 3, actual: bytes.len() });
            }
            partial |= (bytes[2] as u32) << 12;
            consumed = 3;
        }
    }
    Ok((
        AckIdField {
            stream,
            partial,
            bits: bits_for_len(consumed),
        },
        consumed,
    ))
}

/// Reconstruct a full 20-bit id from `bits` transmitted low bits, choosing
/// the candidate nearest to `expected` (forward-biased on ties).
pub fn reconstruct(partial: u32, bits: u32, expected: u32) -> u32 {
    if bits >= ACK_ID_BITS {
        return partial & ACK_ID_MASK;
    }
    let span = 1u32 << bits;
    let offset = partial.wrapping_sub(expected) & (span - 1);
    if offset <= span / 2 {
        expected.wrapping_add(offset) & ACK_ID_MASK
    } else {
        expected.wrapping_add(offset).wrapping_sub(span) & ACK_ID_MASK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(stream: StreamMode, id: u32, expected: u32) -> u32 {
        let len = encoded_len(id, expected);
        let mut buf = Vec::new();
        encode(stream, id, len, &mut buf);
        assert_eq!(buf.len(), len);
        let (field, consumed) = decode(&buf).unwrap();
        assert_eq!(consumed, len);
        assert_eq!(field.stream, stream);
        reconstruct(field.partial, field.bits, expected)
    }

    #[test]
    fn test_roundtrip_near_expected() {
        for expected in [0u32, 5, 1000, ACK_ID_MASK - 2] {
            for ahead in [0u32, 1, 7, 15] {
                let id = expected.wrapping_add(ahead) & ACK_ID_MASK;
                assert_eq!(roundtrip(StreamMode::Ordered2, id, expected), id);
            }
        }
    }

    #[test]
    fn test_roundtrip_medium_distance() {
        let expected = 4096;
        for ahead in [16u32, 100, 2000] {
            let id = (expected + ahead) & ACK_ID_MASK;
            assert_eq!(roundtrip(StreamMode::Ordered1, id, expected), id);
        }
    }

    #[test]
    fn test_roundtrip_full_width() {
        // Zero and the largest id both survive the three-byte form against
        // an arbitrary expectation.
        for id in [0u32, ACK_ID_MASK] {
            let mut buf = Vec::new();
            encode(StreamMode::Unordered, id, 3, &mut buf);
            let (field, consumed) = decode(&buf).unwrap();
            assert_eq!(consumed, 3);
            assert_eq!(reconstruct(field.partial, field.bits, 123_456), id);
        }
    }

    #[test]
    fn test_reconstruct_across_wrap() {
        // Receiver expects an id just below the wrap point; the sender's id
        // is just past it.
        let expected = ACK_ID_MASK - 3;
        let id = 2; // six ahead of expected, modulo 2^20
        assert_eq!(roundtrip(StreamMode::Ordered3, id, expected), id);
    }

    #[test]
    fn test_reconstruct_slightly_behind() {
        // Stale retransmission: id slightly below the expectation.
        let expected = 100;
        let id = 98;
        let mut buf = Vec::new();
        encode(StreamMode::Ordered1, id, 1, &mut buf);
        let (field, _) = decode(&buf).unwrap();
        assert_eq!(reconstruct(field.partial, field.bits, expected), id);
    }

    #[test]
    fn test_decode_truncated() {
        let mut buf = Vec::new();
        encode(StreamMode::Ordered1, 300_000, 3, &mut buf);
        assert!(decode(&buf[..1]).is_err());
        assert!(decode(&buf[..2]).is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn test_encoded_len_widths() {
        assert_eq!(encoded_len(10, 0), 1);
        assert_eq!(encoded_len(100, 0), 2);
        assert_eq!(encoded_len(600_000, 0), 3);
        // Wrap-adjacent ids still count as "close ahead".
        assert_eq!(encoded_len(1, ACK_ID_MASK), 1);
    }
}
