//! Callback traits through which the transport reports events.
//!
//! The transport is polymorphic over a small set of upcalls; applications
//! implement these traits instead of subclassing anything. Upcalls may block
//! the calling thread, but implementations must not re-enter the write API
//! while holding their own locks shared with other writer threads.

use std::sync::Arc;

use crate::core::error::{ConnectFailure, DisconnectReason};
use crate::server::Session;

/// Client-side event sink.
///
/// `on_connect` and `on_connect_fail` are mutually exclusive and each fires
/// at most once per `Client`. `on_disconnect` fires exactly once after a
/// successful connect.
pub trait ClientHandler: Send + Sync {
    /// The handshake completed and the session is live.
    fn on_connect(&self) {}

    /// The handshake failed; the client is being torn down.
    fn on_connect_fail(&self, _failure: ConnectFailure) {}

    /// A complete message arrived from the server.
    fn on_message(&self, _data: &[u8]) {}

    /// The connection ended.
    fn on_disconnect(&self, _reason: DisconnectReason) {}

    /// Periodic timer upcall, roughly every tick.
    fn on_tick(&self, _now: u32) {}

    /// A fresh clock-sync sample was folded into the drift estimate.
    fn on_clock_update(&self, _rtt_ms: u32, _delta_ms: i32) {}
}

/// Server-side event sink, shared across all sessions.
pub trait SessionHandler: Send + Sync {
    /// A client completed the handshake.
    fn on_connect(&self, _session: &Arc<Session>) {}

    /// A complete message arrived from this client.
    fn on_message(&self, _session: &Arc<Session>, _data: &[u8]) {}

    /// The session ended.
    fn on_disconnect(&self, _session: &Arc<Session>, _reason: DisconnectReason) {}

    /// Periodic timer upcall from the server timer thread.
    fn on_tick(&self, _now: u32) {}
}

/// No-op handler for tests and fire-and-forget tools.
pub struct NullHandler;

impl ClientHandler for NullHandler {}
impl SessionHandler for NullHandler {}
