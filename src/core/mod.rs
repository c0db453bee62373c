//! Core constants, error types, and handler traits.

pub mod constants;
pub mod error;
pub mod traits;

pub use constants::*;
pub use error::{
    ConnectFailure, CryptoError, DisconnectReason, TransportError, WireError,
    HANDSHAKE_ERR_SERVER_FULL,
};
pub use traits::{ClientHandler, NullHandler, SessionHandler};
