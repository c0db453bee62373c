//! Error types for the transport and handshake layers.

use thiserror::Error;

/// Errors produced by the framing codec.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Input ended before the field it should contain.
    #[error("truncated field: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum bytes the field needs.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Unknown handshake opcode.
    #[error("invalid opcode: 0x{0:02x}")]
    InvalidOpcode(u8),

    /// Protocol magic mismatch.
    #[error("bad protocol magic: 0x{0:08x}")]
    BadMagic(u32),

    /// Packet length does not match its opcode.
    #[error("invalid packet length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Length the opcode mandates.
        expected: usize,
        /// Length received.
        actual: usize,
    },

    /// ACK body failed structural validation.
    #[error("malformed ack body")]
    MalformedAck,
}

/// Errors from the AEAD wrapper and key agreement.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Encryption failed (buffer too small or cipher failure).
    #[error("encryption failed")]
    EncryptFailed,

    /// Authentication tag did not verify.
    #[error("decryption failed")]
    DecryptFailed,

    /// IV counter already seen or below the sliding window.
    #[error("replayed datagram")]
    Replay,

    /// Outbound IV space exhausted; the session must end.
    #[error("iv counter exhausted")]
    CounterExhausted,

    /// Key material has the wrong length or is degenerate.
    #[error("invalid key material")]
    InvalidKey,

    /// Answer failed transcript verification.
    #[error("invalid key-agreement answer")]
    InvalidAnswer,

    /// Challenge failed structural validation.
    #[error("invalid key-agreement challenge")]
    InvalidChallenge,

    /// HKDF expansion failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// Errors returned from the transport write API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Message exceeds what the transport can carry.
    #[error("message of {bytes} bytes exceeds the {max} byte limit")]
    MessageTooLarge {
        /// Submitted size.
        bytes: usize,
        /// Applicable limit.
        max: usize,
    },

    /// Empty message on a path that requires data.
    #[error("empty message")]
    EmptyMessage,

    /// The connection has been torn down.
    #[error("connection is shut down")]
    Disconnected,
}

/// Why a connection attempt failed.
///
/// Reported synchronously from `Client::connect` for setup failures, or via
/// `ClientHandler::on_connect_fail` for failures after the hello is posted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// Server public key had an invalid length or format.
    #[error("invalid server public key")]
    BadServerKey,

    /// DNS produced no usable addresses.
    #[error("hostname did not resolve")]
    ResolveFailed,

    /// Could not bind a local UDP port.
    #[error("could not bind a local udp port")]
    BindFailed,

    /// No answer within the connect timeout.
    #[error("connect timed out")]
    Timeout,

    /// ICMP unreachable received from the server before any reply.
    #[error("icmp unreachable from server")]
    Icmp,

    /// Socket-level send failure.
    #[error("broken pipe")]
    BrokenPipe,

    /// Server reported it is at capacity.
    #[error("server full")]
    ServerFull,

    /// Server reported another handshake error code.
    #[error("handshake error {0}")]
    Handshake(u8),
}

/// Handshake error code for a full server, as carried in S2C_ERROR.
pub const HANDSHAKE_ERR_SERVER_FULL: u8 = 0;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// No valid datagram within the disconnect timeout.
    Timeout,
    /// The peer violated the protocol.
    ProtocolError,
    /// Orderly local or remote shutdown.
    Shutdown,
    /// Application-defined reason code.
    User(u8),
}

impl DisconnectReason {
    /// Wire encoding of the reason byte.
    pub fn to_byte(self) -> u8 {
        match self {
            DisconnectReason::Timeout => 0,
            DisconnectReason::ProtocolError => 1,
            DisconnectReason::Shutdown => 2,
            DisconnectReason::User(code) => code,
        }
    }

    /// Decode a reason byte; unknown codes map to `User`.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => DisconnectReason::Timeout,
            1 => DisconnectReason::ProtocolError,
            2 => DisconnectReason::Shutdown,
            code => DisconnectReason::User(code),
        }
    }
}
