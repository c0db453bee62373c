//! Stateless handshake cookies.
//!
//! A cookie binds a client address to a coarse time epoch under a random
//! per-process key. The server hands one out in S2C_COOKIE without
//! remembering anything; a valid echo in C2S_CHALLENGE proves the client
//! can receive at its claimed address. Verification accepts the current
//! and previous epoch.

use std::net::{IpAddr, SocketAddr};

use blake2::{Blake2s256, Digest};
use rand::rngs::OsRng;
use rand::RngCore;

/// Epoch width; cookies stay valid for one to two epochs.
pub const COOKIE_EPOCH_MS: u32 = 10_000;

/// Keyed cookie mint/verify with no per-client state.
pub struct CookieJar {
    key: [u8; 32],
}

impl CookieJar {
    /// Create a jar with a fresh random key.
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Issue a cookie for `addr` at local time `now` (milliseconds).
    pub fn mint(&self, addr: &SocketAddr, now: u32) -> u32 {
        self.tag(addr, now / COOKIE_EPOCH_MS)
    }

    /// Check an echoed cookie, accepting the current or previous epoch.
    pub fn verify(&self, addr: &SocketAddr, cookie: u32, now: u32) -> bool {
        let epoch = now / COOKIE_EPOCH_MS;
        cookie == self.tag(addr, epoch)
            || (epoch > 0 && cookie == self.tag(addr, epoch - 1))
    }

    fn tag(&self, addr: &SocketAddr, epoch: u32) -> u32 {
        let mut hasher = Blake2s256::new();
        hasher.update(self.key);
        match addr.ip() {
            IpAddr::V4(ip) => hasher.update(ip.octets()),
            IpAddr::V6(ip) => hasher.update(ip.octets()),
        }
        hasher.update(addr.port().to_le_bytes());
        hasher.update(epoch.to_le_bytes());
        let digest = hasher.finalize();
        u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}

impl Default for CookieJar {
    fn default() -> Self {
        Self::new()
    }
}
