//! Cryptographic wrappers: AEAD datagram sealing, key agreement, and
//! handshake cookies.

pub mod aead;
pub mod cookie;
pub mod keyagree;

use std::sync::Mutex;

use crate::core::error::CryptoError;

pub use aead::{Direction, OpenKey, SealKey, AEAD_OVERHEAD};
pub use cookie::CookieJar;
pub use keyagree::{derive_session_keys, KeyAgreementInitiator, KeyHash, ServerKeyPair};

/// Both directions of a session cipher, lock-wrapped so any thread may
/// seal outbound or open inbound datagrams.
pub struct SessionCrypto {
    seal: Mutex<SealKey>,
    open: Mutex<OpenKey>,
}

impl SessionCrypto {
    /// Build the client's view: seals client-to-server, opens
    /// server-to-client.
    pub fn client(hash: &KeyHash, label: &str) -> Result<Self, CryptoError> {
        let (c2s, s2c) = derive_session_keys(hash, label)?;
        Ok(Self {
            seal: Mutex::new(SealKey::new(&c2s, Direction::ClientToServer)),
            open: Mutex::new(OpenKey::new(&s2c, Direction::ServerToClient)),
        })
    }

    /// Build the server's view: seals server-to-client, opens
    /// client-to-server.
    pub fn server(hash: &KeyHash, label: &str) -> Result<Self, CryptoError> {
        let (c2s, s2c) = derive_session_keys(hash, label)?;
        Ok(Self {
            seal: Mutex::new(SealKey::new(&s2c, Direction::ServerToClient)),
            open: Mutex::new(OpenKey::new(&c2s, Direction::ClientToServer)),
        })
    }

    /// Seal an outbound datagram in place.
    pub fn seal_datagram(&self, buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        self.seal.lock().unwrap().seal(buf)
    }

    /// Open an inbound datagram in place.
    pub fn open_datagram(&self, buf: &mut Vec<u8>) -> Result<(), CryptoError> {
        self.open.lock().unwrap().open(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_crypto_both_directions() {
        let server = ServerKeyPair::generate();
        let initiator = KeyAgreementInitiator::new(&server.public_bytes()).unwrap();
        let (answer, server_hash) = server.respond(&initiator.challenge()).unwrap();
        let client_hash = initiator.process_answer(&answer).unwrap();

        let client = SessionCrypto::client(&client_hash, "test").unwrap();
        let server = SessionCrypto::server(&server_hash, "test").unwrap();

        let mut up = b"to server".to_vec();
        client.seal_datagram(&mut up).unwrap();
        server.open_datagram(&mut up).unwrap();
        assert_eq!(up, b"to server");

        let mut down = b"to client".to_vec();
        server.seal_datagram(&mut down).unwrap();
        client.open_datagram(&mut down).unwrap();
        assert_eq!(down, b"to client");
    }
}
