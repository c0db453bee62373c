//! Server: stateless handshake responder, per-client sessions, worker
//! ports, and the timer thread that drives every session's transport.
//!
//! The bootstrap port answers hellos with cookies and challenges with
//! answers; no memory is committed until a challenge passes cookie
//! validation. Established sessions move to one of the worker ports,
//! where all traffic is encrypted.

pub mod table;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::core::constants::{
    ANSWER_BYTES, CHALLENGE_BYTES, DEFAULT_KERNEL_RECV_BUFFER, DEFAULT_SESSION_PORT_COUNT,
    PUBLIC_KEY_BYTES, TICK_RATE_MS, TIMEOUT_DISCONNECT_MS,
};
use crate::core::error::{DisconnectReason, TransportError, HANDSHAKE_ERR_SERVER_FULL};
use crate::core::traits::SessionHandler;
use crate::crypto::{CookieJar, ServerKeyPair, SessionCrypto};
use crate::net;
use crate::server::table::{ConnectionTable, HasAddr, InsertError};
use crate::transport::{
    initial_payload_bytes, maximum_payload_bytes, PacketPipe, Transport, TransportEvents,
};
use crate::wire::handshake::{self, HandshakePacket};
use crate::wire::header::{StreamMode, SuperOp};

/// Timer thread has admitted this session.
const FLAG_TIMED: u32 = 1;
/// Session is condemned; the timer thread unlinks it.
const FLAG_DELETE: u32 = 2;
/// First encrypted datagram seen; transitions exactly once.
const FLAG_SEEN_ENCRYPTED: u32 = 4;

/// Server-side configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Number of session worker ports after the bootstrap port.
    pub session_port_count: usize,
    /// Use IPv6 sockets.
    pub support_ipv6: bool,
    /// Kernel receive buffer request per socket.
    pub kernel_recv_buffer_bytes: usize,
    /// Label mixed into session-key derivation; both sides must agree.
    pub session_label: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            session_port_count: DEFAULT_SESSION_PORT_COUNT,
            support_ipv6: false,
            kernel_recv_buffer_bytes: DEFAULT_KERNEL_RECV_BUFFER,
            session_label: String::new(),
        }
    }
}

/// One established client connection on the server.
pub struct Session {
    addr: SocketAddr,
    session_port: u16,
    worker_index: usize,
    flags: AtomicU32,
    first_challenge: [u8; CHALLENGE_BYTES],
    cached_answer: [u8; ANSWER_BYTES],
    crypto: SessionCrypto,
    transport: Transport,
    destroyed: AtomicBool,
    server: Weak<ServerInner>,
}

impl Session {
    /// Client address this session is keyed under.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Worker port the client talks to.
    pub fn session_port(&self) -> u16 {
        self.session_port
    }

    /// Smoothed RTT estimate for this client.
    pub fn rtt_ms(&self) -> u32 {
        self.transport.rtt_ms()
    }

    /// Queue a reliable message to this client.
    pub fn write_reliable(&self, stream: StreamMode, data: &[u8]) -> Result<(), TransportError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        self.transport.write_reliable(stream, data, SuperOp::Data)
    }

    /// Queue an unreliable message to this client.
    pub fn write_unreliable(&self, data: &[u8]) -> Result<(), TransportError> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        self.transport.write_unreliable(data)
    }

    /// Push queued writes onto the wire without waiting for the tick.
    pub fn flush_write(&self) {
        if let Some(server) = self.server.upgrade() {
            self.transport.flush_write(self, server.now_ms());
        }
    }

    /// Tear this session down, notifying the client. Idempotent.
    pub fn disconnect(&self, reason: DisconnectReason) {
        let Some(server) = self.server.upgrade() else {
            self.destroyed.store(true, Ordering::Release);
            return;
        };
        if let Some(me) = server.table.get(&self.addr) {
            if std::ptr::eq(Arc::as_ptr(&me), self) {
                Session::teardown(&me, reason, true);
                return;
            }
        }
        self.destroyed.store(true, Ordering::Release);
    }

    /// Returns true when this call set the flag (first transition).
    fn set_flag(&self, flag: u32) -> bool {
        self.flags.fetch_or(flag, Ordering::AcqRel) & flag == 0
    }

    fn flag_set(&self, flag: u32) -> bool {
        self.flags.load(Ordering::Acquire) & flag != 0
    }

    /// One-shot teardown; `notify` posts a DISCO to the client.
    fn teardown(session: &Arc<Session>, reason: DisconnectReason, notify: bool) {
        if session.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let Some(server) = session.server.upgrade() else { return };
        if notify {
            session
                .transport
                .post_disconnect(&**session, reason, server.now_ms());
        }
        server.handler.on_disconnect(session, reason);
        session.set_flag(FLAG_DELETE);
    }
}

impl HasAddr for Session {
    fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl PacketPipe for Session {
    fn post_packet(&self, mut payload: Vec<u8>) -> bool {
        let Some(server) = self.server.upgrade() else { return false };
        if self.crypto.seal_datagram(&mut payload).is_err() {
            warn!("encryption failure, datagram dropped");
            return false;
        }
        server.workers[self.worker_index]
            .socket
            .send_to(&payload, self.addr)
            .is_ok()
    }
}

/// Maps transport events for one session onto the shared handler.
struct SessionEvents<'a> {
    session: &'a Arc<Session>,
    handler: &'a dyn SessionHandler,
}

impl TransportEvents for SessionEvents<'_> {
    fn on_message(&mut self, data: &[u8]) {
        self.handler.on_message(self.session, data);
    }

    fn on_disconnect_notice(&mut self, reason: DisconnectReason) {
        Session::teardown(self.session, reason, false);
    }
}

struct Worker {
    socket: std::net::UdpSocket,
    port: u16,
    session_count: AtomicUsize,
}

struct ServerInner {
    config: ServerConfig,
    handler: Arc<dyn SessionHandler>,
    keypair: ServerKeyPair,
    public_key: [u8; PUBLIC_KEY_BYTES],
    cookie_jar: CookieJar,
    table: ConnectionTable<Session>,
    bootstrap: std::net::UdpSocket,
    workers: Vec<Worker>,
    kill: AtomicBool,
    epoch: Instant,
}

/// Handle to a running server. Dropping it stops the threads.
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Server {
    /// Bind the bootstrap port and `session_port_count` worker ports
    /// above it, then start the reader and timer threads.
    pub fn bind(
        port: u16,
        keypair: ServerKeyPair,
        config: ServerConfig,
        handler: Arc<dyn SessionHandler>,
    ) -> std::io::Result<Server> {
        let bootstrap = net::bind_udp(config.support_ipv6, port, config.kernel_recv_buffer_bytes)?;
        bootstrap.set_read_timeout(Some(Duration::from_millis(100)))?;
        let bootstrap_port = bootstrap.local_addr()?.port();

        let mut workers = Vec::with_capacity(config.session_port_count);
        for i in 1..=config.session_port_count as u16 {
            let worker_port = bootstrap_port.checked_add(i).ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::AddrInUse, "session ports overflow")
            })?;
            let socket =
                net::bind_udp(config.support_ipv6, worker_port, config.kernel_recv_buffer_bytes)?;
            socket.set_read_timeout(Some(Duration::from_millis(100)))?;
            workers.push(Worker {
                socket,
                port: worker_port,
                session_count: AtomicUsize::new(0),
            });
        }

        let public_key = keypair.public_bytes();
        let inner = Arc::new(ServerInner {
            config,
            handler,
            keypair,
            public_key,
            cookie_jar: CookieJar::new(),
            table: ConnectionTable::new(),
            bootstrap,
            workers,
            kill: AtomicBool::new(false),
            epoch: Instant::now(),
        });

        let bootstrap_inner = Arc::clone(&inner);
        std::thread::spawn(move || bootstrap_loop(bootstrap_inner));
        for index in 0..inner.workers.len() {
            let worker_inner = Arc::clone(&inner);
            std::thread::spawn(move || worker_loop(worker_inner, index));
        }
        let timer_inner = Arc::clone(&inner);
        std::thread::spawn(move || timer_loop(timer_inner));

        debug!(port = bootstrap_port, "server listening");
        Ok(Server { inner })
    }

    /// The 64-byte public key clients dial with.
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_BYTES] {
        self.inner.public_key
    }

    /// Bootstrap port actually bound.
    pub fn port(&self) -> u16 {
        self.inner
            .bootstrap
            .local_addr()
            .map(|a| a.port())
            .unwrap_or(0)
    }

    /// Live session count.
    pub fn population(&self) -> usize {
        self.inner.table.population()
    }

    /// Stop all server threads. Sessions are dropped without notice.
    pub fn shutdown(&self) {
        self.inner.kill.store(true, Ordering::Release);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.inner.kill.store(true, Ordering::Release);
    }
}

impl ServerInner {
    fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn killed(&self) -> bool {
        self.kill.load(Ordering::Acquire)
    }

    fn least_populated_worker(&self) -> usize {
        let mut best = 0;
        let mut best_count = usize::MAX;
        for (i, worker) in self.workers.iter().enumerate() {
            let count = worker.session_count.load(Ordering::Acquire);
            if count < best_count {
                best = i;
                best_count = count;
            }
        }
        best
    }

    fn handle_worker_read(&self, now: u32, src: SocketAddr, data: &[u8]) {
        let Some(session) = self.table.get(&src) else {
            trace!(%src, "datagram from unknown address");
            return;
        };
        if session.destroyed.load(Ordering::Acquire) {
            return;
        }
        let mut buf = data.to_vec();
        if session.crypto.open_datagram(&mut buf).is_err() {
            trace!(%src, "dropping undecryptable datagram");
            return;
        }
        if session.set_flag(FLAG_SEEN_ENCRYPTED) {
            debug!(%src, "first encrypted datagram");
        }
        let mut events = SessionEvents {
            session: &session,
            handler: &*self.handler,
        };
        session.transport.on_datagram(now, &buf, &mut events, &*session);
    }
}

/// Respond to one packet on the bootstrap port.
fn handle_bootstrap(inner: &Arc<ServerInner>, now: u32, src: SocketAddr, data: &[u8]) {
    match handshake::decode(data) {
        Ok(HandshakePacket::Hello { public_key }) => {
            if public_key != inner.public_key {
                trace!(%src, "hello for a different key");
                return;
            }
            let cookie = inner.cookie_jar.mint(&src, now);
            let _ = inner.bootstrap.send_to(&handshake::encode_cookie(cookie), src);
        }
        Ok(HandshakePacket::Challenge { cookie, challenge }) => {
            handle_challenge(inner, now, src, cookie, &challenge)
        }
        _ => trace!(%src, "ignoring bootstrap packet"),
    }
}

/// Validate a challenge and, when it holds up, admit a session.
fn handle_challenge(
    inner: &Arc<ServerInner>,
    now: u32,
    src: SocketAddr,
    cookie: u32,
    challenge: &[u8; CHALLENGE_BYTES],
) {
    if !inner.cookie_jar.verify(&src, cookie, now) {
        trace!(%src, "stale or forged cookie");
        return;
    }

    // A repeated challenge from a live client gets the cached answer;
    // re-deriving keys on replay would be free CPU for an attacker.
    if let Some(existing) = inner.table.get(&src) {
        if existing.first_challenge == *challenge {
            let pkt = handshake::encode_answer(existing.session_port, &existing.cached_answer);
            let _ = inner.bootstrap.send_to(&pkt, src);
        } else {
            trace!(%src, "challenge mismatch for live session");
        }
        return;
    }

    if inner.table.is_full() {
        let _ = inner
            .bootstrap
            .send_to(&handshake::encode_error(HANDSHAKE_ERR_SERVER_FULL), src);
        return;
    }

    let Ok((answer, key_hash)) = inner.keypair.respond(challenge) else {
        trace!(%src, "unprocessable challenge");
        return;
    };
    let Ok(crypto) = SessionCrypto::server(&key_hash, &inner.config.session_label) else {
        return;
    };

    let worker_index = inner.least_populated_worker();
    let transport = Transport::new(
        initial_payload_bytes(inner.config.support_ipv6),
        maximum_payload_bytes(inner.config.support_ipv6),
    );
    transport.note_recv(now);
    let session = Arc::new(Session {
        addr: src,
        session_port: inner.workers[worker_index].port,
        worker_index,
        flags: AtomicU32::new(0),
        first_challenge: *challenge,
        cached_answer: answer,
        crypto,
        transport,
        destroyed: AtomicBool::new(false),
        server: Arc::downgrade(inner),
    });

    match inner.table.insert(Arc::clone(&session)) {
        Ok(_) => {
            inner.workers[worker_index]
                .session_count
                .fetch_add(1, Ordering::AcqRel);
            let pkt = handshake::encode_answer(session.session_port, &answer);
            let _ = inner.bootstrap.send_to(&pkt, src);
            debug!(%src, port = session.session_port, "session admitted");
            inner.handler.on_connect(&session);
        }
        Err(InsertError::Full) => {
            let _ = inner
                .bootstrap
                .send_to(&handshake::encode_error(HANDSHAKE_ERR_SERVER_FULL), src);
        }
        Err(InsertError::Occupied) => {
            // Raced with another thread admitting the same address.
            trace!(%src, "concurrent admission race");
        }
    }
}

/// Handshake responder loop on the bootstrap port.
fn bootstrap_loop(inner: Arc<ServerInner>) {
    let mut buf = vec![0u8; 2048];
    while !inner.killed() {
        match inner.bootstrap.recv_from(&mut buf) {
            Ok((n, src)) => {
                let now = inner.now_ms();
                handle_bootstrap(&inner, now, src, &buf[..n]);
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => trace!(error = %e, "bootstrap receive error"),
        }
    }
}

/// Encrypted traffic pump for one worker port.
fn worker_loop(inner: Arc<ServerInner>, index: usize) {
    let mut buf = vec![0u8; 2048];
    while !inner.killed() {
        match inner.workers[index].socket.recv_from(&mut buf) {
            Ok((n, src)) => {
                let now = inner.now_ms();
                inner.handle_worker_read(now, src, &buf[..n]);
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => trace!(error = %e, "worker receive error"),
        }
    }
}

/// Admission finalizer and per-session tick driver.
fn timer_loop(inner: Arc<ServerInner>) {
    let mut timed: Vec<Arc<Session>> = Vec::new();
    while !inner.killed() {
        std::thread::sleep(Duration::from_millis(TICK_RATE_MS as u64));
        let now = inner.now_ms();

        for session in inner.table.take_inserted() {
            session.set_flag(FLAG_TIMED);
            timed.push(session);
        }

        timed.retain(|session| {
            if session.destroyed.load(Ordering::Acquire) || session.flag_set(FLAG_DELETE) {
                if inner.table.remove(session) {
                    inner.workers[session.worker_index]
                        .session_count
                        .fetch_sub(1, Ordering::AcqRel);
                }
                return false;
            }
            if now.wrapping_sub(session.transport.last_recv_ms()) >= TIMEOUT_DISCONNECT_MS {
                Session::teardown(session, DisconnectReason::Timeout, true);
                if inner.table.remove(session) {
                    inner.workers[session.worker_index]
                        .session_count
                        .fetch_sub(1, Ordering::AcqRel);
                }
                return false;
            }
            session.transport.tick(&**session, now);
            true
        });

        inner.handler.on_tick(now);
    }
}
