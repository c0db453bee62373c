//! Per-message header codec.
//!
//! Every transport datagram, after decryption, is a sequence of messages.
//! Each message starts with a two-byte little-endian header:
//!
//! ```text
//!  0 1 2 3 4 5 6 7 8 9 a b c d e f
//! <-- LSB ----------------- MSB -->
//! |   DATA_BYTES(11)    |I|R| SOP |
//! ```
//!
//! `DATA_BYTES` counts the data part only; the optional ACK-ID field that
//! follows the header when `I` is set is NOT included, while the 16-bit
//! fragment header at the start of a fragmented message IS.

use crate::core::error::WireError;

/// Mask for the 11-bit DATA_BYTES field.
pub const DATALEN_MASK: u16 = 0x07ff;
/// "Followed by an ACK-ID field" bit.
pub const I_MASK: u16 = 1 << 11;
/// "Reliable" bit.
pub const R_MASK: u16 = 1 << 12;
/// Super-opcode shift.
pub const SOP_SHIFT: u16 = 13;

/// Largest DATA_BYTES value one message header can carry.
pub const MAX_HEADER_DATALEN: usize = DATALEN_MASK as usize;

/// Reliable stream selector.
///
/// Stream 0 is reliable-unordered; streams 1-3 are reliable-ordered with
/// independent sequencing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamMode {
    /// Reliable, unordered delivery.
    Unordered = 0,
    /// Reliable, ordered stream 1.
    Ordered1 = 1,
    /// Reliable, ordered stream 2.
    Ordered2 = 2,
    /// Reliable, ordered stream 3.
    Ordered3 = 3,
}

impl StreamMode {
    /// All streams in wire order.
    pub const ALL: [StreamMode; 4] = [
        StreamMode::Unordered,
        StreamMode::Ordered1,
        StreamMode::Ordered2,
        StreamMode::Ordered3,
    ];

    /// Stream from its 2-bit selector.
    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            0 => Some(StreamMode::Unordered),
            1 => Some(StreamMode::Ordered1),
            2 => Some(StreamMode::Ordered2),
            3 => Some(StreamMode::Ordered3),
            _ => None,
        }
    }

    /// Index into per-stream state arrays.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether this stream preserves submission order on delivery.
    pub fn is_ordered(self) -> bool {
        !matches!(self, StreamMode::Unordered)
    }
}

/// Super-opcode: what the message body means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SuperOp {
    /// Application data (reliable or unreliable).
    Data = 0,
    /// Slice of a fragmented reliable message.
    Frag = 1,
    /// Acknowledgment body (unreliable).
    Ack = 2,
    /// Padded MTU probe (unreliable).
    MtuProbe = 3,
    /// New payload limit learned from a probe (unordered reliable).
    MtuSet = 4,
    /// Clock-sync ping, doubles as keep-alive (unreliable).
    TimePing = 5,
    /// Clock-sync pong (unreliable).
    TimePong = 6,
    /// Disconnect notification with reason byte (unreliable).
    Disco = 7,
}

impl SuperOp {
    /// Decode a 3-bit SOP value; all eight values are defined.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 7 {
            0 => SuperOp::Data,
            1 => SuperOp::Frag,
            2 => SuperOp::Ack,
            3 => SuperOp::MtuProbe,
            4 => SuperOp::MtuSet,
            5 => SuperOp::TimePing,
            6 => SuperOp::TimePong,
            _ => SuperOp::Disco,
        }
    }
}

/// Decoded two-byte message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Bytes of data following the header (and the ACK-ID field, if any).
    pub data_bytes: u16,
    /// Header is followed by an ACK-ID field applying to this and all
    /// following reliable messages in the datagram.
    pub has_ack_id: bool,
    /// Reliable delivery.
    pub reliable: bool,
    /// Super-opcode.
    pub sop: SuperOp,
}

impl MessageHeader {
    /// Encoded size.
    pub const SIZE: usize = 2;

    /// Encode to the two-byte wire form.
    pub fn encode(&self) -> [u8; 2] {
        let mut word = self.data_bytes & DATALEN_MASK;
        if self.has_ack_id {
            word |= I_MASK;
        }
        if self.reliable {
            word |= R_MASK;
        }
        word |= (self.sop as u16) << SOP_SHIFT;
        word.to_le_bytes()
    }

    /// Decode from the first two bytes of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < Self::SIZE {
            return Err(WireError::Truncated {
                expected: Self::SIZE,
                actual: bytes.len(),
            });
        }
        let word = u16::from_le_bytes([bytes[0], bytes[1]]);
        Ok(Self {
            data_bytes: word & DATALEN_MASK,
            has_ack_id: word & I_MASK != 0,
            reliable: word & R_MASK != 0,
            sop: SuperOp::from_bits((word >> SOP_SHIFT) as u8),
        })
    }
}
