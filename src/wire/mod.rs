//! Framing codec: message headers, ACK-ID fields, ACK bodies, and
//! handshake packets.
//!
//! All multi-byte integers are little-endian on the wire.

pub mod ack;
pub mod ack_id;
pub mod handshake;
pub mod header;

pub use ack::StreamAck;
pub use header::{MessageHeader, StreamMode, SuperOp, MAX_HEADER_DATALEN};
