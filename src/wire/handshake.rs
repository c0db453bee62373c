//! Handshake packet codec.
//!
//! Handshake packets travel unencrypted on the server's bootstrap port.
//! Every packet has a fixed size keyed by its opcode; anything else is
//! silently dropped by callers.

use crate::core::constants::{
    ANSWER_BYTES, CHALLENGE_BYTES, C2S_CHALLENGE_LEN, C2S_HELLO_LEN, PROTOCOL_MAGIC,
    PUBLIC_KEY_BYTES, S2C_ANSWER_LEN, S2C_COOKIE_LEN, S2C_ERROR_LEN,
};
use crate::core::error::WireError;

/// Handshake opcodes, first byte of every bootstrap packet.
pub mod opcode {
    /// Client hello.
    pub const C2S_HELLO: u8 = 0;
    /// Server cookie.
    pub const S2C_COOKIE: u8 = 1;
    /// Client challenge.
    pub const C2S_CHALLENGE: u8 = 2;
    /// Server answer.
    pub const S2C_ANSWER: u8 = 3;
    /// Server handshake error.
    pub const S2C_ERROR: u8 = 4;
}

/// A decoded handshake packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakePacket {
    /// C2S_HELLO: the client names the server key it expects.
    Hello {
        /// Expected server public key.
        public_key: [u8; PUBLIC_KEY_BYTES],
    },
    /// S2C_COOKIE: opaque echoable cookie, no server state behind it.
    Cookie {
        /// Cookie value to echo in the challenge.
        cookie: u32,
    },
    /// C2S_CHALLENGE: echoed cookie plus key-agreement challenge.
    Challenge {
        /// Cookie echoed from S2C_COOKIE.
        cookie: u32,
        /// Public challenge bytes.
        challenge: [u8; CHALLENGE_BYTES],
    },
    /// S2C_ANSWER: session port plus key-agreement answer.
    Answer {
        /// Worker port the client must use from now on.
        session_port: u16,
        /// Answer material.
        answer: [u8; ANSWER_BYTES],
    },
    /// S2C_ERROR: one-byte handshake error code.
    Error {
        /// Error code; see [`crate::core::error::HANDSHAKE_ERR_SERVER_FULL`].
        code: u8,
    },
}

/// Encode a hello packet (69 bytes).
pub fn encode_hello(public_key: &[u8; PUBLIC_KEY_BYTES]) -> [u8; C2S_HELLO_LEN] {
    let mut pkt = [0u8; C2S_HELLO_LEN];
    pkt[0] = opcode::C2S_HELLO;
    pkt[1..5].copy_from_slice(&PROTOCOL_MAGIC.to_le_bytes());
    pkt[5..].copy_from_slice(public_key);
    pkt
}

/// Encode a cookie packet (5 bytes).
pub fn encode_cookie(cookie: u32) -> [u8; S2C_COOKIE_LEN] {
    let mut pkt = [0u8; S2C_COOKIE_LEN];
    pkt[0] = opcode::S2C_COOKIE;
    pkt[1..5].copy_from_slice(&cookie.to_le_bytes());
    pkt
}

/// Encode a challenge packet (73 bytes).
pub fn encode_challenge(cookie: u32, challenge: &[u8; CHALLENGE_BYTES]) -> [u8; C2S_CHALLENGE_LEN] {
    let mut pkt = [0u8; C2S_CHALLENGE_LEN];
    pkt[0] = opcode::C2S_CHALLENGE;
    pkt[1..5].copy_from_slice(&PROTOCOL_MAGIC.to_le_bytes());
    pkt[5..9].copy_from_slice(&cookie.to_le_bytes());
    pkt[9..].copy_from_slice(challenge);
    pkt
}

/// Encode an answer packet (131 bytes). The session port is little-endian.
pub fn encode_answer(session_port: u16, answer: &[u8; ANSWER_BYTES]) -> [u8; S2C_ANSWER_LEN] {
    let mut pkt = [0u8; S2C_ANSWER_LEN];
    pkt[0] = opcode::S2C_ANSWER;
    pkt[1..3].copy_from_slice(&session_port.to_le_bytes());
    pkt[3..].copy_from_slice(answer);
    pkt
}

/// Encode an error packet (2 bytes).
pub fn encode_error(code: u8) -> [u8; S2C_ERROR_LEN] {
    [opcode::S2C_ERROR, code]
}

/// Decode a handshake packet, validating opcode, length, and (where the
/// packet carries it) the protocol magic.
pub fn decode(bytes: &[u8]) -> Result<HandshakePacket, WireError> {
    let op = *bytes.first().ok_or(WireError::Truncated { expected: 1, actual: 0 })?;
    let check_len = |expected: usize| {
        if bytes.len() == expected {
            Ok(())
        } else {
            Err(WireError::InvalidLength { expected, actual: bytes.len() })
        }
    };
    match op {
        opcode::C2S_HELLO => {
            check_len(C2S_HELLO_LEN)?;
            check_magic(&bytes[1..5])?;
            let mut public_key = [0u8; PUBLIC_KEY_BYTES];
            public_key.copy_from_slice(&bytes[5..]);
            Ok(HandshakePacket::Hello { public_key })
        }
        opcode::S2C_COOKIE => {
            check_len(S2C_COOKIE_LEN)?;
            let cookie = u32::from_le_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
            Ok(HandshakePacket::Cookie { cookie })
        }
        opcode::C2S_CHALLENGE => {
            check_len(C2S_CHALLENGE_LEN)?;
            check_magic(&bytes[1..5])?;
            let cookie = u32::from_le_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
            let mut challenge = [0u8; CHALLENGE_BYTES];
            challenge.copy_from_slice(&bytes[9..]);
            Ok(HandshakePacket::Challenge { cookie, challenge })
        }
        opcode::S2C_ANSWER => {
            check_len(S2C_ANSWER_LEN)?;
            let session_port = u16::from_le_bytes([bytes[1], bytes[2]]);
            let mut answer = [0u8; ANSWER_BYTES];
            answer.copy_from_slice(&bytes[3..]);
            Ok(HandshakePacket::Answer { session_port, answer })
        }
        opcode::S2C_ERROR => {
            check_len(S2C_ERROR_LEN)?;
            Ok(HandshakePacket::Error { code: bytes[1] })
        }
        other => Err(WireError::InvalidOpcode(other)),
    }
}

fn check_magic(bytes: &[u8]) -> Result<(), WireError> {
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic == PROTOCOL_MAGIC {
        Ok(())
    } else {
        Err(WireError::BadMagic(magic))
    }
}
