//! Client: connects to a server, runs the handshake, then drives the
//! transport from a timer thread.
//!
//! Threading: one reader thread feeds inbound datagrams, one timer thread
//! runs the handshake schedule and then the transport tick. Application
//! threads may write at any time. Teardown is a one-shot atomic: whichever
//! caller flips it performs the upcall and stops the threads; everyone
//! else observes it and returns.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::core::constants::{
    ip_udp_overhead, CONNECT_TIMEOUT_MS, DEFAULT_KERNEL_RECV_BUFFER, HANDSHAKE_TICK_MS,
    MAXIMUM_MTU, MEDIUM_MTU, PUBLIC_KEY_BYTES, SILENCE_LIMIT_MS, TICK_RATE_MS,
    TIMEOUT_DISCONNECT_MS, TIME_SYNC_FAST_COUNT, TIME_SYNC_FAST_MS, TIME_SYNC_INTERVAL_MS,
};
use crate::core::error::{ConnectFailure, DisconnectReason, TransportError, HANDSHAKE_ERR_SERVER_FULL};
use crate::core::traits::ClientHandler;
use crate::crypto::{KeyAgreementInitiator, SessionCrypto, AEAD_OVERHEAD};
use crate::net;
use crate::transport::{
    initial_payload_bytes, maximum_payload_bytes, MtuAction, MtuDiscovery, PacketPipe, Transport,
    TransportEvents,
};
use crate::wire::handshake::{self, HandshakePacket};
use crate::wire::header::{StreamMode, SuperOp};

/// Client-side configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Use an IPv6 socket (and IPv6 resolution) instead of IPv4.
    pub support_ipv6: bool,
    /// Kernel receive buffer request for the UDP socket.
    pub kernel_recv_buffer_bytes: usize,
    /// Give up the handshake after this long.
    pub connect_timeout_ms: u32,
    /// Label mixed into session-key derivation; both sides must agree.
    pub session_label: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            support_ipv6: false,
            kernel_recv_buffer_bytes: DEFAULT_KERNEL_RECV_BUFFER,
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            session_label: String::new(),
        }
    }
}

/// Handshake progress, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    HelloPosted,
    ChallengePosted,
}

struct ClientInner {
    config: ClientConfig,
    handler: Arc<dyn ClientHandler>,
    socket: std::net::UdpSocket,
    /// Current server address; the port moves to the advertised session
    /// port once the answer arrives.
    server_addr: Mutex<SocketAddr>,
    bootstrap_port: u16,
    agreement: KeyAgreementInitiator,
    server_public_key: [u8; PUBLIC_KEY_BYTES],
    phase: Mutex<Phase>,
    crypto: OnceLock<SessionCrypto>,
    transport: Transport,
    connected: AtomicBool,
    /// Set once any packet is accepted from the server; ICMP errors stop
    /// being fatal from then on.
    got_server_packet: AtomicBool,
    destroyed: AtomicBool,
    kill: AtomicBool,
    epoch: Instant,
}

/// Handle to a connected (or connecting) client.
///
/// Dropping the handle tears the connection down without notifying the
/// server; prefer [`Client::disconnect`].
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Resolve `hostname:port`, bind a socket, post the hello, and start
    /// the client threads.
    ///
    /// Setup failures (bad key, resolution, bind) are returned directly;
    /// later handshake failures arrive via
    /// [`ClientHandler::on_connect_fail`].
    pub fn connect(
        server_key: &[u8],
        hostname: &str,
        port: u16,
        config: ClientConfig,
        handler: Arc<dyn ClientHandler>,
    ) -> Result<Client, ConnectFailure> {
        let agreement =
            KeyAgreementInitiator::new(server_key).map_err(|_| ConnectFailure::BadServerKey)?;
        let mut server_public_key = [0u8; PUBLIC_KEY_BYTES];
        server_public_key.copy_from_slice(server_key);

        let addrs = net::resolve(hostname, port, config.support_ipv6);
        let server_addr = *addrs.first().ok_or(ConnectFailure::ResolveFailed)?;

        let socket = net::bind_udp(config.support_ipv6, 0, config.kernel_recv_buffer_bytes)
            .map_err(|_| ConnectFailure::BindFailed)?;
        socket
            .connect(server_addr)
            .map_err(|_| ConnectFailure::BindFailed)?;
        socket
            .set_read_timeout(Some(Duration::from_millis(TICK_RATE_MS as u64)))
            .map_err(|_| ConnectFailure::BindFailed)?;

        let transport = Transport::new(
            initial_payload_bytes(config.support_ipv6),
            maximum_payload_bytes(config.support_ipv6),
        );
        let inner = Arc::new(ClientInner {
            config,
            handler,
            socket,
            server_addr: Mutex::new(server_addr),
            bootstrap_port: port,
            agreement,
            server_public_key,
            phase: Mutex::new(Phase::HelloPosted),
            crypto: OnceLock::new(),
            transport,
            connected: AtomicBool::new(false),
            got_server_packet: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            kill: AtomicBool::new(false),
            epoch: Instant::now(),
        });

        if !inner.post_hello() {
            return Err(ConnectFailure::BrokenPipe);
        }
        debug!(%server_addr, "hello posted");

        let reader = Arc::clone(&inner);
        std::thread::spawn(move || reader_loop(reader));
        let timer = Arc::clone(&inner);
        std::thread::spawn(move || timer_loop(timer));

        Ok(Client { inner })
    }

    /// Queue a reliable message.
    pub fn write_reliable(&self, stream: StreamMode, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.inner.transport.write_reliable(stream, data, SuperOp::Data)
    }

    /// Queue an unreliable message.
    pub fn write_unreliable(&self, data: &[u8]) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        self.inner.transport.write_unreliable(data)
    }

    /// Push queued writes onto the wire without waiting for the tick.
    pub fn flush_write(&self) {
        if self.is_connected() {
            let now = self.inner.now_ms();
            self.inner.transport.flush_write(&*self.inner, now);
        }
    }

    /// Whether the handshake has completed and the session is live.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire) && !self.inner.destroyed.load(Ordering::Acquire)
    }

    /// Tear down, notifying the server. Idempotent.
    pub fn disconnect(&self, reason: DisconnectReason) {
        self.inner.disconnect(reason, true);
    }

    /// Convert a local millisecond timestamp to estimated server time.
    pub fn to_server_time(&self, client_time: u32) -> u32 {
        self.inner.transport.to_server_time(client_time)
    }

    /// Milliseconds since this client was created; the timebase used by
    /// every timestamp the client exposes.
    pub fn now_ms(&self) -> u32 {
        self.inner.now_ms()
    }

    /// Smoothed RTT estimate.
    pub fn rtt_ms(&self) -> u32 {
        self.inner.transport.rtt_ms()
    }

    /// Local socket address.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.socket.local_addr().ok()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.kill.store(true, Ordering::Release);
    }
}

impl ClientInner {
    fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn post_hello(&self) -> bool {
        if self.connected.load(Ordering::Acquire) {
            return false;
        }
        let pkt = handshake::encode_hello(&self.server_public_key);
        self.socket.send(&pkt).is_ok()
    }

    fn on_read(&self, now: u32, data: &[u8]) {
        if self.connected.load(Ordering::Acquire) {
            let Some(crypto) = self.crypto.get() else { return };
            let mut buf = data.to_vec();
            if crypto.open_datagram(&mut buf).is_err() {
                trace!("dropping undecryptable datagram");
                return;
            }
            let mut events = ClientEvents { inner: self };
            self.transport.on_datagram(now, &buf, &mut events, self);
            return;
        }
        match handshake::decode(data) {
            Ok(HandshakePacket::Cookie { cookie }) => self.on_cookie(cookie),
            Ok(HandshakePacket::Answer { session_port, answer }) => {
                self.on_answer(now, session_port, &answer)
            }
            Ok(HandshakePacket::Error { code }) => self.on_handshake_error(code),
            _ => trace!("ignoring unexpected handshake packet"),
        }
    }

    fn on_cookie(&self, cookie: u32) {
        self.got_server_packet.store(true, Ordering::Release);
        let pkt = handshake::encode_challenge(cookie, &self.agreement.challenge());
        if self.socket.send(&pkt).is_ok() {
            *self.phase.lock().unwrap() = Phase::ChallengePosted;
            debug!(cookie, "cookie accepted, challenge posted");
        } else {
            self.connect_fail(ConnectFailure::BrokenPipe);
        }
    }

    fn on_answer(&self, now: u32, session_port: u16, answer: &[u8]) {
        // A sane answer advertises a session port above the bootstrap
        // port; anything else is noise.
        if session_port <= self.bootstrap_port {
            trace!(session_port, "ignoring answer with nonsense port");
            return;
        }
        let Ok(key_hash) = self.agreement.process_answer(answer) else {
            trace!("ignoring invalid answer");
            return;
        };
        let Ok(crypto) = SessionCrypto::client(&key_hash, &self.config.session_label) else {
            return;
        };
        if self.crypto.set(crypto).is_err() {
            return; // a concurrent answer won the race
        }

        let new_addr = {
            let mut addr = self.server_addr.lock().unwrap();
            addr.set_port(session_port);
            *addr
        };
        if self.socket.connect(new_addr).is_err() {
            self.connect_fail(ConnectFailure::BrokenPipe);
            return;
        }
        self.transport.note_recv(now);
        self.connected.store(true, Ordering::Release);
        debug!(%new_addr, "connected");
        self.handler.on_connect();
    }

    fn on_handshake_error(&self, code: u8) {
        let failure = if code == HANDSHAKE_ERR_SERVER_FULL {
            ConnectFailure::ServerFull
        } else {
            ConnectFailure::Handshake(code)
        };
        self.connect_fail(failure);
    }

    fn connect_fail(&self, failure: ConnectFailure) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let phase = *self.phase.lock().unwrap();
        warn!(%failure, ?phase, "connect failed");
        self.handler.on_connect_fail(failure);
        self.kill.store(true, Ordering::Release);
    }

    /// One-shot teardown; `notify` posts a DISCO to the server.
    fn disconnect(&self, reason: DisconnectReason, notify: bool) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.connected.load(Ordering::Acquire) {
            if notify {
                self.transport.post_disconnect(self, reason, self.now_ms());
            }
            self.handler.on_disconnect(reason);
        }
        self.kill.store(true, Ordering::Release);
    }

    fn killed(&self) -> bool {
        self.kill.load(Ordering::Acquire)
    }

    /// Sleep one scheduling quantum; true when teardown was requested.
    fn sleep_killed(&self, ms: u32) -> bool {
        std::thread::sleep(Duration::from_millis(ms as u64));
        self.killed()
    }

    fn post_probes(&self) {
        let overhead = ip_udp_overhead(self.config.support_ipv6) + AEAD_OVERHEAD;
        let now = self.now_ms();
        for mtu in [MAXIMUM_MTU, MEDIUM_MTU] {
            if !self.transport.post_mtu_probe(self, mtu - overhead, now) {
                warn!(mtu, "mtu probe post failed");
            }
        }
    }
}

impl PacketPipe for ClientInner {
    fn post_packet(&self, mut payload: Vec<u8>) -> bool {
        let Some(crypto) = self.crypto.get() else { return false };
        if crypto.seal_datagram(&mut payload).is_err() {
            warn!("encryption failure, datagram dropped");
            return false;
        }
        self.socket.send(&payload).is_ok()
    }
}

/// Maps transport events onto the client handler.
struct ClientEvents<'a> {
    inner: &'a ClientInner,
}

impl TransportEvents for ClientEvents<'_> {
    fn on_message(&mut self, data: &[u8]) {
        self.inner.handler.on_message(data);
    }

    fn on_disconnect_notice(&mut self, reason: DisconnectReason) {
        self.inner.disconnect(reason, false);
    }

    fn on_clock_update(&mut self, rtt_ms: u32, delta_ms: i32) {
        self.inner.handler.on_clock_update(rtt_ms, delta_ms);
    }
}

/// Inbound datagram pump.
fn reader_loop(inner: Arc<ClientInner>) {
    let mut buf = vec![0u8; 2048];
    while !inner.killed() {
        match inner.socket.recv(&mut buf) {
            Ok(n) => {
                let now = inner.now_ms();
                inner.on_read(now, &buf[..n]);
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e)
                if e.kind() == std::io::ErrorKind::ConnectionRefused
                    || e.kind() == std::io::ErrorKind::ConnectionReset =>
            {
                // ICMP unreachable: fatal only until the server has
                // spoken once.
                if !inner.got_server_packet.load(Ordering::Acquire) {
                    inner.connect_fail(ConnectFailure::Icmp);
                }
            }
            Err(e) => {
                trace!(error = %e, "socket receive error");
            }
        }
    }
}

/// Handshake schedule followed by the steady-state transport tick.
fn timer_loop(inner: Arc<ClientInner>) {
    let start = inner.now_ms();
    let first_hello = start;
    let mut last_hello = start;
    let mut hello_interval = HANDSHAKE_TICK_MS;

    while !inner.connected.load(Ordering::Acquire) {
        if inner.sleep_killed(HANDSHAKE_TICK_MS) {
            return;
        }
        if inner.connected.load(Ordering::Acquire) {
            break;
        }
        let now = inner.now_ms();
        if now.wrapping_sub(first_hello) >= inner.config.connect_timeout_ms {
            inner.connect_fail(ConnectFailure::Timeout);
            return;
        }
        if now.wrapping_sub(last_hello) >= hello_interval {
            if !inner.post_hello() {
                inner.connect_fail(ConnectFailure::BrokenPipe);
                return;
            }
            last_hello = now;
            hello_interval = hello_interval.saturating_mul(2);
        }
        inner.handler.on_tick(now);
    }

    // Connected: begin MTU discovery and clock synchronization.
    let max_possible = maximum_payload_bytes(inner.config.support_ipv6);
    let mut mtu = MtuDiscovery::start(inner.now_ms(), max_possible);
    if net::set_dont_fragment(&inner.socket, true) {
        inner.post_probes();
    } else {
        warn!("cannot set DF bit, skipping mtu discovery");
        mtu.disable();
    }

    let mut next_sync = inner.now_ms();
    let mut sync_attempts = 0u32;
    inner.transport.note_recv(inner.now_ms());

    loop {
        if inner.sleep_killed(TICK_RATE_MS) {
            return;
        }
        let now = inner.now_ms();
        inner.transport.tick(&*inner, now);

        if (now.wrapping_sub(next_sync) as i32) >= 0 {
            inner.transport.post_time_ping(&*inner, now);
            if sync_attempts >= TIME_SYNC_FAST_COUNT {
                next_sync = now.wrapping_add(TIME_SYNC_INTERVAL_MS);
            } else {
                next_sync = now.wrapping_add(TIME_SYNC_FAST_MS);
                sync_attempts += 1;
            }
        }

        match mtu.on_tick(now, inner.transport.max_payload()) {
            MtuAction::Probe => inner.post_probes(),
            MtuAction::Finish => {
                net::set_dont_fragment(&inner.socket, false);
            }
            MtuAction::None => {}
        }

        if now.wrapping_sub(inner.transport.last_recv_ms()) >= TIMEOUT_DISCONNECT_MS {
            inner.disconnect(DisconnectReason::Timeout, true);
            return;
        }

        inner.handler.on_tick(now);

        if now.wrapping_sub(inner.transport.last_send_ms()) >= SILENCE_LIMIT_MS {
            inner.transport.post_time_ping(&*inner, now);
            next_sync = now.wrapping_add(TIME_SYNC_INTERVAL_MS);
        }
    }
}
