//! # Sphynx
//!
//! Sphynx is a secure, connection-oriented, reliable message transport
//! over UDP. A client authenticates a server's long-term public key and
//! establishes a fresh session key through a cookie-protected handshake;
//! all subsequent traffic is encrypted and integrity-protected. Messages
//! travel over four reliable streams (stream 0 unordered, streams 1-3
//! ordered) or as fire-and-forget unreliable datagrams, with path-MTU
//! discovery and client/server clock synchronization built in.
//!
//! ## Modules
//!
//! - [`core`]: constants, error types, and the handler traits
//! - [`wire`]: framing codec (headers, ACK-IDs, ACK bodies, handshake)
//! - [`crypto`]: AEAD wrapper, key agreement, handshake cookies
//! - [`transport`]: reliable send/recv engines, RTT, MTU, clock sync
//! - [`client`] / [`server`]: threaded endpoints
//! - [`net`]: UDP socket plumbing
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sphynx::{Client, ClientConfig, NullHandler, StreamMode};
//!
//! let server_key = [0u8; 64]; // obtained out of band
//! let client = Client::connect(
//!     &server_key,
//!     "game.example.com",
//!     5000,
//!     ClientConfig::default(),
//!     Arc::new(NullHandler),
//! )?;
//! // ... once connected:
//! let _ = client.write_reliable(StreamMode::Ordered1, b"hello");
//! # Ok::<(), sphynx::ConnectFailure>(())
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod core;
pub mod crypto;
pub mod net;
pub mod server;
pub mod transport;
pub mod wire;

pub use crate::client::{Client, ClientConfig};
pub use crate::core::error::{
    ConnectFailure, CryptoError, DisconnectReason, TransportError, WireError,
};
pub use crate::core::traits::{ClientHandler, NullHandler, SessionHandler};
pub use crate::crypto::ServerKeyPair;
pub use crate::server::{Server, ServerConfig, Session};
pub use crate::transport::Transport;
pub use crate::wire::{StreamMode, SuperOp};
