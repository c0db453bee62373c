//! Protocol constants.
//!
//! These values are fixed by the wire protocol and MUST NOT be changed
//! without bumping `PROTOCOL_MAGIC`.

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Magic value carried in C2S_HELLO and C2S_CHALLENGE.
pub const PROTOCOL_MAGIC: u32 = 0xC47D_0001;

/// Advertised server public key size (x25519 point + key salt).
pub const PUBLIC_KEY_BYTES: usize = 64;

/// Client challenge size (ephemeral point + nonce).
pub const CHALLENGE_BYTES: usize = 64;

/// Server answer size (ephemeral point + nonce + transcript proof).
pub const ANSWER_BYTES: usize = 128;

/// Key-hash size produced by the key agreement.
pub const KEY_HASH_BYTES: usize = 64;

/// C2S_HELLO: opcode + magic + server public key.
pub const C2S_HELLO_LEN: usize = 1 + 4 + PUBLIC_KEY_BYTES;

/// S2C_COOKIE: opcode + cookie.
pub const S2C_COOKIE_LEN: usize = 1 + 4;

/// C2S_CHALLENGE: opcode + magic + echoed cookie + challenge.
pub const C2S_CHALLENGE_LEN: usize = 1 + 4 + 4 + CHALLENGE_BYTES;

/// S2C_ANSWER: opcode + session port + answer.
pub const S2C_ANSWER_LEN: usize = 1 + 2 + ANSWER_BYTES;

/// S2C_ERROR: opcode + error code.
pub const S2C_ERROR_LEN: usize = 1 + 1;

// =============================================================================
// STREAMS AND IDS
// =============================================================================

/// Number of reliable streams (stream 0 unordered, 1-3 ordered).
pub const NUM_STREAMS: usize = 4;

/// Width of a reliable message id on the wire.
pub const ACK_ID_BITS: u32 = 20;

/// Mask for a 20-bit wire id.
pub const ACK_ID_MASK: u32 = (1 << ACK_ID_BITS) - 1;

/// Maximum bytes in the data part of one reassembled message.
pub const MAX_MESSAGE_DATALEN: usize = 65535;

/// Minimum data bytes worth putting in a fragment slice.
pub const FRAG_THRESHOLD: usize = 32;

// =============================================================================
// MTU
// =============================================================================

/// Smallest MTU the transport assumes before discovery (dialup floor).
pub const MINIMUM_MTU: usize = 576;

/// Mid-tier MTU probe target (high-speed behind tunnels).
pub const MEDIUM_MTU: usize = 1400;

/// Largest MTU probe target (untunneled high-speed).
pub const MAXIMUM_MTU: usize = 1500;

/// IPv4 header plus worst-case options.
pub const IPV4_HEADER_BYTES: usize = 20 + 40;

/// IPv6 header plus worst-case extension headers.
pub const IPV6_HEADER_BYTES: usize = 40 + 40;

/// UDP header.
pub const UDP_HEADER_BYTES: usize = 8;

/// IP + UDP overhead for the given address family.
pub fn ip_udp_overhead(ipv6: bool) -> usize {
    if ipv6 {
        IPV6_HEADER_BYTES + UDP_HEADER_BYTES
    } else {
        IPV4_HEADER_BYTES + UDP_HEADER_BYTES
    }
}

/// Interval between MTU re-probes.
pub const MTU_PROBE_INTERVAL_MS: u32 = 5_000;

/// Number of probe rounds before the DF bit is cleared for survivability.
pub const MTU_PROBE_ATTEMPTS: u32 = 2;

// =============================================================================
// TIMING
// =============================================================================

/// Transport tick period.
pub const TICK_RATE_MS: u32 = 20;

/// Handshake thread wait granularity and initial hello repost interval.
pub const HANDSHAKE_TICK_MS: u32 = 200;

/// Give up connecting after this long without an answer.
pub const CONNECT_TIMEOUT_MS: u32 = 10_000;

/// Drop a connection after this long without any valid datagram.
pub const TIMEOUT_DISCONNECT_MS: u32 = 15_000;

/// Emit a keep-alive after this long without sending anything.
pub const SILENCE_LIMIT_MS: u32 = 5_000;

/// RTT assumed before the first sample.
pub const INITIAL_RTT_MS: u32 = 1_500;

/// Floor for the retransmission timer.
pub const MIN_RTO_MS: u32 = 100;

// =============================================================================
// CLOCK SYNCHRONIZATION
// =============================================================================

/// Ping interval while confidence is still being built.
pub const TIME_SYNC_FAST_MS: u32 = 5_000;

/// Steady-state ping interval.
pub const TIME_SYNC_INTERVAL_MS: u32 = 20_000;

/// Number of fast-interval pings after connecting.
pub const TIME_SYNC_FAST_COUNT: u32 = 8;

/// Ring capacity for clock-sync samples.
pub const MAX_TS_SAMPLES: usize = 64;

/// Smallest low-RTT subset used for the delta estimate.
pub const MIN_TS_SAMPLES: usize = 3;

/// Samples required before the drift slope is trusted.
pub const MIN_DRIFT_SAMPLES: usize = 4;

// =============================================================================
// CONNECTION TABLE
// =============================================================================

/// Connection table slots (power of two).
pub const HASH_TABLE_SIZE: usize = 32768;

/// Refuse inserts past this population.
pub const MAX_POPULATION: usize = HASH_TABLE_SIZE / 2;

/// LCG probe multiplier; (multiplier - 1) is divisible by every prime
/// factor of the table size and by 4, so the probe sequence covers the
/// whole table.
pub const COLLISION_MULTIPLIER: u32 = 71 * 5861 * 4 + 1;

/// LCG probe increment.
pub const COLLISION_INCREMENTER: u32 = 1_013_904_223;

// =============================================================================
// DEFAULT CONFIGURATION
// =============================================================================

/// Default kernel receive buffer request.
pub const DEFAULT_KERNEL_RECV_BUFFER: usize = 1_000_000;

/// Default number of session worker ports.
pub const DEFAULT_SESSION_PORT_COUNT: usize = 8;
