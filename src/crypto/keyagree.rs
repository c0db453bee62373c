//! Cookie-protected key agreement.
//!
//! The server's advertised identity is 64 bytes: an x25519 static public
//! point followed by a 32-byte key salt. The client proves nothing about
//! itself; it authenticates the *server* and derives a fresh session key:
//!
//! ```text
//! challenge (64) = client ephemeral point (32) || client nonce (32)
//! answer   (128) = server ephemeral point (32) || server nonce (32)
//!                  || transcript proof (64)
//! ```
//!
//! Both sides compute `key hash = BLAKE2b-512(salt, DH(e_c, e_s),
//! DH(e_c, s_s), nonces)`. Only the holder of the server static secret can
//! compute `DH(e_c, s_s)`, so a valid proof authenticates the server. The
//! AEAD keys are expanded from the key hash with a caller-supplied session
//! label.

use blake2::{Blake2b512, Digest};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::core::constants::{ANSWER_BYTES, CHALLENGE_BYTES, KEY_HASH_BYTES, PUBLIC_KEY_BYTES};
use crate::core::error::CryptoError;

const KEY_HASH_LABEL: &[u8] = b"sphynx v1 key hash";
const PROOF_LABEL: &[u8] = b"sphynx v1 answer proof";
const SESSION_KEY_LABEL: &[u8] = b"sphynx v1 session keys ";

/// Shared secret hash both sides derive from the key agreement.
pub struct KeyHash([u8; KEY_HASH_BYTES]);

impl KeyHash {
    /// Raw hash bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_HASH_BYTES] {
        &self.0
    }
}

impl Drop for KeyHash {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Server long-term identity: static x25519 keypair plus key salt.
pub struct ServerKeyPair {
    secret: StaticSecret,
    public: PublicKey,
    salt: [u8; 32],
}

impl ServerKeyPair {
    /// Generate a fresh identity.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        let mut salt = [0u8; 32];
        OsRng.fill_bytes(&mut salt);
        Self { secret, public, salt }
    }

    /// Rebuild an identity from stored key material.
    pub fn from_parts(secret: [u8; 32], salt: [u8; 32]) -> Self {
        let secret = StaticSecret::from(secret);
        let public = PublicKey::from(&secret);
        Self { secret, public, salt }
    }

    /// The 64-byte public identity clients dial with.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_BYTES] {
        let mut out = [0u8; PUBLIC_KEY_BYTES];
        out[..32].copy_from_slice(self.public.as_bytes());
        out[32..].copy_from_slice(&self.salt);
        out
    }

    /// Process a client challenge, producing the answer to send back and
    /// the shared key hash.
    pub fn respond(&self, challenge: &[u8]) -> Result<([u8; ANSWER_BYTES], KeyHash), CryptoError> {
        if challenge.len() != CHALLENGE_BYTES {
            return Err(CryptoError::InvalidChallenge);
        }
        let mut client_point = [0u8; 32];
        client_point.copy_from_slice(&challenge[..32]);
        let client_eph = PublicKey::from(client_point);
        let client_nonce = &challenge[32..];

        let eph_secret = StaticSecret::random_from_rng(OsRng);
        let eph_public = PublicKey::from(&eph_secret);
        let mut server_nonce = [0u8; 32];
        OsRng.fill_bytes(&mut server_nonce);

        let dh_ee = eph_secret.diffie_hellman(&client_eph);
        let dh_es = self.secret.diffie_hellman(&client_eph);
        if !dh_ee.was_contributory() || !dh_es.was_contributory() {
            return Err(CryptoError::InvalidChallenge);
        }

        let hash = key_hash(
            &self.salt,
            dh_ee.as_bytes(),
            dh_es.as_bytes(),
            client_nonce,
            &server_nonce,
        );
        let proof = answer_proof(&hash, challenge, eph_public.as_bytes(), &server_nonce);

        let mut answer = [0u8; ANSWER_BYTES];
        answer[..32].copy_from_slice(eph_public.as_bytes());
        answer[32..64].copy_from_slice(&server_nonce);
        answer[64..].copy_from_slice(&proof);
        Ok((answer, hash))
    }
}

/// Client side of the key agreement.
pub struct KeyAgreementInitiator {
    server_static: PublicKey,
    salt: [u8; 32],
    eph_secret: StaticSecret,
    eph_public: PublicKey,
    nonce: [u8; 32],
}

impl KeyAgreementInitiator {
    /// Validate a 64-byte server key and prepare a challenge.
    pub fn new(server_key: &[u8]) -> Result<Self, CryptoError> {
        if server_key.len() != PUBLIC_KEY_BYTES {
            return Err(CryptoError::InvalidKey);
        }
        let mut point = [0u8; 32];
        point.copy_from_slice(&server_key[..32]);
        if point.iter().all(|&b| b == 0) {
            return Err(CryptoError::InvalidKey);
        }
        let mut salt = [0u8; 32];
        salt.copy_from_slice(&server_key[32..]);

        let eph_secret = StaticSecret::random_from_rng(OsRng);
        let eph_public = PublicKey::from(&eph_secret);
        let mut nonce = [0u8; 32];
        OsRng.fill_bytes(&mut nonce);

        Ok(Self {
            server_static: PublicKey::from(point),
            salt,
            eph_secret,
            eph_public,
            nonce,
        })
    }

    /// Public challenge bytes to carry in C2S_CHALLENGE. Stable across
    /// calls so retransmitted challenges are byte-identical.
    pub fn challenge(&self) -> [u8; CHALLENGE_BYTES] {
        let mut out = [0u8; CHALLENGE_BYTES];
        out[..32].copy_from_slice(self.eph_public.as_bytes());
        out[32..].copy_from_slice(&self.nonce);
        out
    }

    /// Validate a server answer and derive the shared key hash.
    pub fn process_answer(&self, answer: &[u8]) -> Result<KeyHash, CryptoError> {
        if answer.len() != ANSWER_BYTES {
            return Err(CryptoError::InvalidAnswer);
        }
        let mut server_point = [0u8; 32];
        server_point.copy_from_slice(&answer[..32]);
        let server_eph = PublicKey::from(server_point);
        let server_nonce = &answer[32..64];
        let proof = &answer[64..];

        let dh_ee = self.eph_secret.diffie_hellman(&server_eph);
        let dh_es = self.eph_secret.diffie_hellman(&self.server_static);
        if !dh_ee.was_contributory() || !dh_es.was_contributory() {
            return Err(CryptoError::InvalidAnswer);
        }

        let hash = key_hash(
            &self.salt,
            dh_ee.as_bytes(),
            dh_es.as_bytes(),
            &self.nonce,
            server_nonce,
        );
        let expected = answer_proof(&hash, &self.challenge(), &server_point, server_nonce);
        if bool::from(proof.ct_eq(&expected)) {
            Ok(hash)
        } else {
            Err(CryptoError::InvalidAnswer)
        }
    }
}

fn key_hash(
    salt: &[u8; 32],
    dh_ee: &[u8; 32],
    dh_es: &[u8; 32],
    client_nonce: &[u8],
    server_nonce: &[u8],
) -> KeyHash {
    let mut hasher = Blake2b512::new();
    hasher.update(KEY_HASH_LABEL);
    hasher.update(salt);
    hasher.update(dh_ee);
    hasher.update(dh_es);
    hasher.update(client_nonce);
    hasher.update(server_nonce);
    let digest = hasher.finalize();
    let mut out = [0u8; KEY_HASH_BYTES];
    out.copy_from_slice(&digest);
    KeyHash(out)
}

fn answer_proof(
    hash: &KeyHash,
    challenge: &[u8],
    server_eph: &[u8; 32],
    server_nonce: &[u8],
) -> [u8; 64] {
    let mut hasher = Blake2b512::new();
    hasher.update(PROOF_LABEL);
    hasher.update(hash.as_bytes());
    hasher.update(challenge);
    hasher.update(server_eph);
    hasher.update(server_nonce);
    let digest = hasher.finalize();
    let mut out = [0u8; 64];
    out.copy_from_slice(&digest);
    out
}

/// Expand the key hash into the two directional AEAD keys
/// (client-to-server, server-to-client) under a session label.
pub fn derive_session_keys(
    hash: &KeyHash,
    label: &str,
) -> Result<([u8; 32], [u8; 32]), CryptoError> {
    let hk = Hkdf::<Sha256>::new(None, hash.as_bytes());
    let mut info = Vec::with_capacity(SESSION_KEY_LABEL.len() + label.len());
    info.extend_from_slice(SESSION_KEY_LABEL);
    info.extend_from_slice(label.as_bytes());

    let mut okm = [0u8; 64];
    hk.expand(&info, &mut okm)
        .map_err(|_| CryptoError::KeyDerivationFailed)?;
    let mut c2s = [0u8; 32];
    let mut s2c = [0u8; 32];
    c2s.copy_from_slice(&okm[..32]);
    s2c.copy_from_slice(&okm[32..]);
    okm.zeroize();
    Ok((c2s, s2c))
}
