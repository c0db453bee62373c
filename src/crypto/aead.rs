//! AEAD wrapper: in-place datagram seal/open.
//!
//! Sealed wire layout:
//!
//! ```text
//! CIPHERTEXT || TAG(16) || IV(3)
//! ```
//!
//! The IV on the wire is the low 24 bits of a monotonic per-direction
//! counter; the receiver expands it against the highest counter it has
//! accepted and rejects anything already seen or below the sliding
//! anti-replay window. A failed open leaves no state change.

use chacha20poly1305::aead::generic_array::GenericArray;
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    XChaCha20Poly1305, XNonce,
};

use crate::core::error::CryptoError;

/// Poly1305 tag size.
pub const TAG_BYTES: usize = 16;

/// Truncated IV bytes appended to every sealed datagram.
pub const IV_BYTES: usize = 3;

/// Constant per-datagram encryption overhead.
pub const AEAD_OVERHEAD: usize = TAG_BYTES + IV_BYTES;

/// Outbound counters stop here; the session must end before reuse.
const COUNTER_LIMIT: u64 = 1 << 48;

/// Traffic direction, bound into the nonce so the two directions never
/// share IV space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    ClientToServer,
    /// Server to client.
    ServerToClient,
}

impl Direction {
    fn byte(self) -> u8 {
        match self {
            Direction::ClientToServer => 0,
            Direction::ServerToClient => 1,
        }
    }
}

fn nonce_for(dir: Direction, counter: u64) -> XNonce {
    let mut bytes = [0u8; 24];
    bytes[0] = dir.byte();
    bytes[16..24].copy_from_slice(&counter.to_le_bytes());
    XNonce::from(bytes)
}

/// Expand a 24-bit wire IV to the full counter nearest to `expected`.
fn expand_counter(trunc: u32, expected: u64) -> u64 {
    const SPAN: u64 = 1 << (IV_BYTES * 8);
    let base = (expected & !(SPAN - 1)) | trunc as u64;
    let low = base.wrapping_sub(SPAN);
    let high = base.wrapping_add(SPAN);
    let dist = |candidate: u64| candidate.abs_diff(expected);
    let mut best = base;
    if low < base && dist(low) < dist(best) {
        best = low;
    }
    if dist(high) < dist(best) {
        best = high;
    }
    best
}

/// Sliding-bitmap duplicate tracker for inbound counters.
#[derive(Debug, Clone)]
struct ReplayWindow {
    /// Highest accepted counter.
    highest: u64,
    /// Bit i covers counter `highest - 1 - i`.
    bitmap: [u64; Self::WORDS],
    primed: bool,
}

impl ReplayWindow {
    const WORDS: usize = 16;
    const SIZE: u64 = (Self::WORDS * 64) as u64;

    fn new() -> Self {
        Self {
            highest: 0,
            bitmap: [0; Self::WORDS],
            primed: false,
        }
    }

    /// Counter the next in-order datagram is expected to carry.
    fn expected(&self) -> u64 {
        if self.primed {
            self.highest.saturating_add(1)
        } else {
            0
        }
    }

    fn is_replay(&self, counter: u64) -> bool {
        if !self.primed || counter > self.highest {
            return false;
        }
        if counter == self.highest {
            return true;
        }
        let diff = self.highest - counter;
        if diff > Self::SIZE {
            return true;
        }
        let bit = (diff - 1) as usize;
        self.bitmap[bit / 64] & (1 << (bit % 64)) != 0
    }

    fn commit(&mut self, counter: u64) {
        if !self.primed {
            self.highest = counter;
            self.primed = true;
            return;
        }
        if counter > self.highest {
            let shift = counter - self.highest;
            self.shift(shift);
            self.highest = counter;
        } else {
            let diff = self.highest - counter;
            if diff == 0 || diff > Self::SIZE {
                return;
            }
            let bit = (diff - 1) as usize;
            self.bitmap[bit / 64] |= 1 << (bit % 64);
        }
    }

    fn shift(&mut self, shift: u64) {
        if shift >= Self::SIZE {
            self.bitmap = [0; Self::WORDS];
            return;
        }
        let words = (shift / 64) as usize;
        let bits = (shift % 64) as u32;
        if words > 0 {
            for i in (words..Self::WORDS).rev() {
                self.bitmap[i] = self.bitmap[i - words];
            }
            for word in self.bitmap.iter_mut().take(words) {
                *word = 0;
            }
        }
        if bits > 0 {
            let mut carry = 0u64;
            for i in 0..Self::WORDS {
                let next_carry = self.bitmap[i] >> (64 - bits);
                self.bitmap[i] = (self.bitmap[i] << bits) | carry;
                carry = next_carry;
            }
        }
        // The previous highest becomes a seen bit at offset shift - 1.
        let bit = (shift - 1) as usize;
        self.bitmap[bit / 64] |= 1 << (bit % 64);
    }
}

/// Outbound half of a session cipher.
pub struct SealKey {
    cipher: XChaCha20Poly1305,
    dir: Direction,
    counter: u64,
}

impl SealKey {
    /// Build from a 32-byte session key.
    pub fn new(key: &[u8; 32], dir: Direction) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(GenericArray::from_slice(key)),
            dir,
            counter: 0,
        }
    }

    /// Encrypt `buf` in place and append the tag and truncated IV.
    pub fn seal(&mut self, buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        if self.counter >= COUNTER_LIMIT {
            return Err(CryptoError::CounterExhausted);
        }
        let counter = self.counter;
        let nonce = nonce_for(self.dir, counter);
        let tag = self
            .cipher
            .encrypt_in_place_detached(&nonce, b"", buf.as_mut_slice())
            .map_err(|_| CryptoError::EncryptFailed)?;
        buf.extend_from_slice(tag.as_slice());
        buf.extend_from_slice(&counter.to_le_bytes()[..IV_BYTES]);
        self.counter += 1;
        Ok(())
    }
}

/// Inbound half of a session cipher.
pub struct OpenKey {
    cipher: XChaCha20Poly1305,
    dir: Direction,
    window: ReplayWindow,
}

impl OpenKey {
    /// Build from a 32-byte session key.
    pub fn new(key: &[u8; 32], dir: Direction) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(GenericArray::from_slice(key)),
            dir,
            window: ReplayWindow::new(),
        }
    }

    /// Verify and strip the tag and IV, truncating `buf` to the plaintext.
    ///
    /// On any failure `buf` is left untouched and no window state changes.
    pub fn open(&mut self, buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        if buf.len() <= AEAD_OVERHEAD {
            return Err(CryptoError::DecryptFailed);
        }
        let body_len = buf.len() - AEAD_OVERHEAD;
        let trunc = u32::from_le_bytes([
            buf[body_len + TAG_BYTES],
            buf[body_len + TAG_BYTES + 1],
            buf[body_len + TAG_BYTES + 2],
            0,
        ]);
        let counter = expand_counter(trunc, self.window.expected());
        if self.window.is_replay(counter) {
            return Err(CryptoError::Replay);
        }
        let nonce = nonce_for(self.dir, counter);
        let tag = *GenericArray::from_slice(&buf[body_len..body_len + TAG_BYTES]);
        self.cipher
            .decrypt_in_place_detached(&nonce, b"", &mut buf[..body_len], &tag)
            .map_err(|_| CryptoError::DecryptFailed)?;
        self.window.commit(counter);
        buf.truncate(body_len);
        Ok(())
    }
}
