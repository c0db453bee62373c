//! Transport core: datagram parse/dispatch, tick-driven flush and
//! retransmit, MTU learning, and clock synchronization.
//!
//! A `Transport` is shared by a client or a server-side session. Callers
//! feed decrypted datagrams into [`Transport::on_datagram`] and drive
//! [`Transport::tick`] from a timer thread; outbound datagrams leave
//! through a [`PacketPipe`] which encrypts and transmits.
//!
//! Locking: `send` guards the send queues and RTT state, `recv` guards
//! reorder and ACK state, `clock` guards the drift triple. The two engine
//! locks are never held at the same time, and no lock is held across an
//! upcall or a socket send.

pub mod clock_sync;
pub mod mtu;
pub mod rtt;

mod recv;
mod send;

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::{debug, trace};

use crate::core::constants::{
    ip_udp_overhead, ACK_ID_BITS, ACK_ID_MASK, MINIMUM_MTU, TIMEOUT_DISCONNECT_MS,
};
use crate::core::error::{DisconnectReason, TransportError};
use crate::crypto::AEAD_OVERHEAD;
use crate::transport::clock_sync::ClockSync;
use crate::transport::recv::{Delivery, RecvEngine};
use crate::transport::rtt::RttEstimator;
use crate::transport::send::SendEngine;
use crate::wire::header::{MessageHeader, StreamMode, SuperOp};
use crate::wire::{ack, ack_id};

pub use mtu::{MtuAction, MtuDiscovery};

/// Expand a 20-bit wire id to the full sequence number nearest to
/// `reference`.
pub(crate) fn expand_seq(wire: u32, reference: u64) -> u64 {
    const SPAN: u64 = 1 << ACK_ID_BITS;
    let wire = (wire & ACK_ID_MASK) as u64;
    let base = (reference & !(SPAN - 1)) | wire;
    let mut best = base;
    let mut best_dist = base.abs_diff(reference);
    if base >= SPAN {
        let low = base - SPAN;
        let dist = low.abs_diff(reference);
        if dist < best_dist {
            best = low;
            best_dist = dist;
        }
    }
    let high = base + SPAN;
    if high.abs_diff(reference) < best_dist {
        best = high;
    }
    best
}

/// Encrypts and transmits one assembled datagram payload.
pub trait PacketPipe: Send + Sync {
    /// Returns false when the datagram could not be sent; the payload is
    /// dropped (reliable content stays in the sent list for retransmit).
    fn post_packet(&self, payload: Vec<u8>) -> bool;
}

/// Sink for the effects of one decrypted datagram.
///
/// The client and server-session adapters implement this to route
/// transport events to their application handlers.
pub trait TransportEvents {
    /// A complete message became deliverable.
    fn on_message(&mut self, data: &[u8]);
    /// The peer announced a disconnect with the given reason.
    fn on_disconnect_notice(&mut self, reason: DisconnectReason);
    /// A clock-sync sample was folded into the drift estimate.
    fn on_clock_update(&mut self, _rtt_ms: u32, _delta_ms: i32) {}
}

struct SendState {
    engine: SendEngine,
    rtt: RttEstimator,
}

/// Initial payload budget before MTU discovery, for the address family.
pub fn initial_payload_bytes(ipv6: bool) -> usize {
    MINIMUM_MTU - ip_udp_overhead(ipv6) - AEAD_OVERHEAD
}

/// Largest payload budget discovery can ever learn.
pub fn maximum_payload_bytes(ipv6: bool) -> usize {
    crate::core::constants::MAXIMUM_MTU - ip_udp_overhead(ipv6) - AEAD_OVERHEAD
}

/// Reliable/unreliable message transport over one encrypted datagram flow.
pub struct Transport {
    send: Mutex<SendState>,
    recv: Mutex<RecvEngine>,
    clock: Mutex<ClockSync>,
    max_payload: AtomicUsize,
    /// Hard ceiling on what MTU_SET may teach us.
    payload_cap: usize,
    last_recv: AtomicU32,
    last_send: AtomicU32,
}

impl Transport {
    /// Create a transport with an initial payload budget and the ceiling
    /// MTU discovery may raise it to.
    pub fn new(max_payload: usize, payload_cap: usize) -> Self {
        Self {
            send: Mutex::new(SendState {
                engine: SendEngine::new(),
                rtt: RttEstimator::new(),
            }),
            recv: Mutex::new(RecvEngine::new()),
            clock: Mutex::new(ClockSync::new()),
            max_payload: AtomicUsize::new(max_payload.min(payload_cap)),
            payload_cap,
            last_recv: AtomicU32::new(0),
            last_send: AtomicU32::new(0),
        }
    }

    /// Current outbound payload budget per datagram.
    pub fn max_payload(&self) -> usize {
        self.max_payload.load(Ordering::Relaxed)
    }

    /// Raise the payload budget; it never shrinks and never exceeds the
    /// construction-time ceiling.
    pub fn raise_max_payload(&self, bytes: usize) {
        let bytes = bytes.min(self.payload_cap);
        let prev = self.max_payload.fetch_max(bytes, Ordering::Relaxed);
        if bytes > prev {
            debug!(bytes, "payload budget raised");
        }
    }

    /// Reliable messages on the wire awaiting acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.send.lock().unwrap().engine.in_flight()
    }

    /// Smoothed RTT estimate in milliseconds.
    pub fn rtt_ms(&self) -> u32 {
        self.send.lock().unwrap().rtt.srtt_ms()
    }

    /// Timestamp of the last accepted datagram.
    pub fn last_recv_ms(&self) -> u32 {
        self.last_recv.load(Ordering::Relaxed)
    }

    /// Timestamp of the last successfully posted datagram.
    pub fn last_send_ms(&self) -> u32 {
        self.last_send.load(Ordering::Relaxed)
    }

    /// Reset the receive clock, e.g. right after connecting.
    pub fn note_recv(&self, now: u32) {
        self.last_recv.store(now, Ordering::Relaxed);
    }

    /// Convert a local millisecond timestamp to estimated server time.
    pub fn to_server_time(&self, client_time: u32) -> u32 {
        self.clock.lock().unwrap().to_server_time(client_time)
    }

    /// Whether anything is queued for the next flush.
    pub fn has_queued_writes(&self) -> bool {
        self.send.lock().unwrap().engine.has_queued()
    }

    /// Whether an ACK is owed to the peer.
    pub fn has_pending_ack(&self) -> bool {
        self.recv.lock().unwrap().has_pending_ack()
    }

    /// Queue a reliable message on `stream`.
    pub fn write_reliable(
        &self,
        stream: StreamMode,
        data: &[u8],
        sop: SuperOp,
    ) -> Result<(), TransportError> {
        self.send.lock().unwrap().engine.write_reliable(stream, data, sop)
    }

    /// Queue an unreliable message for the next datagram.
    pub fn write_unreliable(&self, data: &[u8]) -> Result<(), TransportError> {
        let max_payload = self.max_payload();
        self.send
            .lock()
            .unwrap()
            .engine
            .write_unreliable(SuperOp::Data, data, max_payload)
    }

    /// Flush pending ACKs and queued messages to the wire now.
    pub fn flush_write(&self, pipe: &dyn PacketPipe, now: u32) {
        let acks = self.recv.lock().unwrap().take_ack_blocks();
        let max_payload = self.max_payload();
        let mut datagrams = Vec::new();
        {
            let mut state = self.send.lock().unwrap();
            state.engine.flush(&acks, max_payload, now, &mut datagrams);
        }
        self.post_all(pipe, datagrams, now);
    }

    /// One transport tick: retransmit what timed out, then flush.
    pub fn tick(&self, pipe: &dyn PacketPipe, now: u32) {
        let acks = self.recv.lock().unwrap().take_ack_blocks();
        let max_payload = self.max_payload();
        let mut datagrams = Vec::new();
        {
            let mut state = self.send.lock().unwrap();
            let rto = state.rtt.rto_ms();
            state.engine.retransmit_due(now, rto, max_payload, &mut datagrams);
            state.engine.flush(&acks, max_payload, now, &mut datagrams);
        }
        self.post_all(pipe, datagrams, now);
    }

    /// Post a clock-sync ping (also the keep-alive) out of band.
    pub fn post_time_ping(&self, pipe: &dyn PacketPipe, now: u32) {
        let header = MessageHeader {
            data_bytes: 4,
            has_ack_id: false,
            reliable: false,
            sop: SuperOp::TimePing,
        };
        let mut payload = Vec::with_capacity(6);
        payload.extend_from_slice(&header.encode());
        payload.extend_from_slice(&now.to_le_bytes());
        self.post_one(pipe, payload, now);
    }

    fn post_time_pong(&self, pipe: &dyn PacketPipe, client_t0: u32, now: u32) {
        let header = MessageHeader {
            data_bytes: 8,
            has_ack_id: false,
            reliable: false,
            sop: SuperOp::TimePong,
        };
        let mut payload = Vec::with_capacity(10);
        payload.extend_from_slice(&header.encode());
        payload.extend_from_slice(&client_t0.to_le_bytes());
        payload.extend_from_slice(&now.to_le_bytes());
        self.post_one(pipe, payload, now);
    }

    /// Post a zero-padded MTU probe as its own datagram, bypassing the
    /// reliable path so the probe's wire size is exactly `payload_bytes`.
    pub fn post_mtu_probe(&self, pipe: &dyn PacketPipe, payload_bytes: usize, now: u32) -> bool {
        if payload_bytes <= MessageHeader::SIZE {
            return false;
        }
        let header = MessageHeader {
            data_bytes: (payload_bytes - MessageHeader::SIZE) as u16,
            has_ack_id: false,
            reliable: false,
            sop: SuperOp::MtuProbe,
        };
        let mut payload = vec![0u8; payload_bytes];
        payload[..2].copy_from_slice(&header.encode());
        self.post_one(pipe, payload, now)
    }

    /// Post a disconnect notification.
    pub fn post_disconnect(&self, pipe: &dyn PacketPipe, reason: DisconnectReason, now: u32) {
        let header = MessageHeader {
            data_bytes: 1,
            has_ack_id: false,
            reliable: false,
            sop: SuperOp::Disco,
        };
        let mut payload = Vec::with_capacity(3);
        payload.extend_from_slice(&header.encode());
        payload.push(reason.to_byte());
        self.post_one(pipe, payload, now);
    }

    fn post_all(&self, pipe: &dyn PacketPipe, datagrams: Vec<Vec<u8>>, now: u32) {
        for datagram in datagrams {
            self.post_one(pipe, datagram, now);
        }
    }

    fn post_one(&self, pipe: &dyn PacketPipe, payload: Vec<u8>, now: u32) -> bool {
        if pipe.post_packet(payload) {
            self.last_send.store(now, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Process one decrypted inbound datagram.
    ///
    /// Malformed trailing content is dropped silently; everything parsed
    /// before it still takes effect.
    pub fn on_datagram(
        &self,
        now: u32,
        data: &[u8],
        events: &mut dyn TransportEvents,
        pipe: &dyn PacketPipe,
    ) {
        self.last_recv.store(now, Ordering::Relaxed);
        let total_len = data.len();
        let mut deliveries: Vec<Delivery> = Vec::new();
        let mut cont: Option<(StreamMode, u32)> = None;
        let mut off = 0;

        while off < data.len() {
            let Ok(header) = MessageHeader::decode(&data[off..]) else {
                trace!("truncated message header");
                break;
            };
            off += MessageHeader::SIZE;

            if header.has_ack_id {
                match ack_id::decode(&data[off..]) {
                    Ok((field, consumed)) => {
                        off += consumed;
                        let expected = self.recv.lock().unwrap().expected20(field.stream);
                        let id20 = ack_id::reconstruct(field.partial, field.bits, expected);
                        cont = Some((field.stream, id20));
                    }
                    Err(_) => {
                        trace!("truncated ack-id field");
                        break;
                    }
                }
            }

            let len = header.data_bytes as usize;
            if off + len > data.len() {
                trace!("message data overruns datagram");
                break;
            }
            let body = &data[off..off + len];
            off += len;

            if header.reliable {
                let Some((stream, id20)) = cont else {
                    trace!("reliable message without ack-id context");
                    continue;
                };
                {
                    let mut recv = self.recv.lock().unwrap();
                    recv.on_reliable(
                        stream,
                        id20,
                        header.sop,
                        header.sop == SuperOp::Frag,
                        body,
                        &mut deliveries,
                    );
                }
                cont = Some((stream, (id20 + 1) & ACK_ID_MASK));
                continue;
            }

            match header.sop {
                SuperOp::Data => deliveries.push(Delivery {
                    sop: SuperOp::Data,
                    data: body.to_vec(),
                }),
                SuperOp::Ack => match ack::decode(body) {
                    Ok(blocks) => {
                        let mut state = self.send.lock().unwrap();
                        let samples = state.engine.on_ack(&blocks, now);
                        for sample in samples {
                            state.rtt.on_sample(sample);
                        }
                    }
                    Err(_) => trace!("malformed ack body"),
                },
                SuperOp::MtuProbe => {
                    if total_len > self.max_payload() {
                        let value = total_len.min(u16::MAX as usize) as u16;
                        debug!(value, "probe exceeds current budget, advertising");
                        let _ = self.write_reliable(
                            StreamMode::Unordered,
                            &value.to_le_bytes(),
                            SuperOp::MtuSet,
                        );
                    }
                }
                SuperOp::TimePing => {
                    if body.len() == 4 {
                        let t0 = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                        self.post_time_pong(pipe, t0, now);
                    }
                }
                SuperOp::TimePong => {
                    if body.len() == 8 {
                        let t0 = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                        let t1 = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                        let rtt = now.wrapping_sub(t0);
                        if rtt < TIMEOUT_DISCONNECT_MS {
                            let delta = t1.wrapping_sub(t0).wrapping_sub(rtt / 2) as i32;
                            self.clock.lock().unwrap().update(now, rtt, delta);
                            events.on_clock_update(rtt, delta);
                        }
                    }
                }
                SuperOp::Disco => {
                    if body.len() == 1 {
                        events.on_disconnect_notice(DisconnectReason::from_byte(body[0]));
                    }
                }
                // FRAG and MTU_SET are only meaningful reliable.
                SuperOp::Frag | SuperOp::MtuSet => trace!("unreliable {:?} ignored", header.sop),
            }
        }

        for delivery in deliveries {
            match delivery.sop {
                SuperOp::Data => events.on_message(&delivery.data),
                SuperOp::MtuSet => {
                    if delivery.data.len() == 2 {
                        let bytes =
                            u16::from_le_bytes([delivery.data[0], delivery.data[1]]) as usize;
                        self.raise_max_payload(bytes);
                    }
                }
                other => trace!("dropping reliable {:?} payload", other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Pipe that records every posted datagram.
    struct CapturePipe {
        sent: StdMutex<Vec<Vec<u8>>>,
    }

    impl CapturePipe {
        fn new() -> Self {
            Self { sent: StdMutex::new(Vec::new()) }
        }

        fn take(&self) -> Vec<Vec<u8>> {
            std::mem::take(&mut self.sent.lock().unwrap())
        }
    }

    impl PacketPipe for CapturePipe {
        fn post_packet(&self, payload: Vec<u8>) -> bool {
            self.sent.lock().unwrap().push(payload);
            true
        }
    }

    #[derive(Default)]
    struct CaptureEvents {
        messages: Vec<Vec<u8>>,
        disconnects: Vec<DisconnectReason>,
        clock_updates: Vec<(u32, i32)>,
    }

    impl TransportEvents for CaptureEvents {
        fn on_message(&mut self, data: &[u8]) {
            self.messages.push(data.to_vec());
        }
        fn on_disconnect_notice(&mut self, reason: DisconnectReason) {
            self.disconnects.push(reason);
        }
        fn on_clock_update(&mut self, rtt_ms: u32, delta_ms: i32) {
            self.clock_updates.push((rtt_ms, delta_ms));
        }
    }

    fn pump(
        from: &Transport,
        to: &Transport,
        from_pipe: &CapturePipe,
        to_events: &mut CaptureEvents,
        reply_pipe: &CapturePipe,
        now: u32,
    ) {
        for datagram in from_pipe.take() {
            to.on_datagram(now, &datagram, to_events, reply_pipe);
        }
    }

    #[test]
    fn test_end_to_end_reliable_ordered() {
        let a = Transport::new(500, 1450);
        let b = Transport::new(500, 1450);
        let a_pipe = CapturePipe::new();
        let b_pipe = CapturePipe::new();
        let mut b_events = CaptureEvents::default();

        for i in 0..20u8 {
            a.write_reliable(StreamMode::Ordered1, &[i, i, i], SuperOp::Data)
                .unwrap();
        }
        a.tick(&a_pipe, 100);
        pump(&a, &b, &a_pipe, &mut b_events, &b_pipe, 110);

        assert_eq!(b_events.messages.len(), 20);
        for (i, msg) in b_events.messages.iter().enumerate() {
            assert_eq!(msg, &vec![i as u8; 3]);
        }

        // B owes an ACK and sends it on its next tick even while idle.
        b.tick(&b_pipe, 120);
        let acks = b_pipe.take();
        assert_eq!(acks.len(), 1);
        let mut a_events = CaptureEvents::default();
        a.on_datagram(130, &acks[0], &mut a_events, &a_pipe);
        assert_eq!(a.send.lock().unwrap().engine.in_flight(), 0);
    }

    #[test]
    fn test_loss_recovered_by_retransmit() {
        let a = Transport::new(500, 1450);
        let b = Transport::new(500, 1450);
        let a_pipe = CapturePipe::new();
        let b_pipe = CapturePipe::new();
        let mut b_events = CaptureEvents::default();

        a.write_reliable(StreamMode::Ordered1, b"lost", SuperOp::Data)
            .unwrap();
        a.tick(&a_pipe, 0);
        let _dropped = a_pipe.take(); // first transmission lost in transit

        // Past the RTO the message is re-sent and arrives.
        a.tick(&a_pipe, 4000);
        pump(&a, &b, &a_pipe, &mut b_events, &b_pipe, 4010);
        assert_eq!(b_events.messages, vec![b"lost".to_vec()]);

        // The duplicate from one more retransmit is suppressed.
        a.tick(&a_pipe, 9000);
        pump(&a, &b, &a_pipe, &mut b_events, &b_pipe, 9010);
        assert_eq!(b_events.messages.len(), 1);
    }

    #[test]
    fn test_ordered_delivery_over_patterned_loss() {
        let a = Transport::new(500, 1450);
        let b = Transport::new(500, 1450);
        let a_pipe = CapturePipe::new();
        let b_pipe = CapturePipe::new();
        let mut b_events = CaptureEvents::default();

        for i in 0..100u32 {
            let mut msg = vec![0u8; 40];
            msg[..4].copy_from_slice(&i.to_le_bytes());
            a.write_reliable(StreamMode::Ordered1, &msg, SuperOp::Data)
                .unwrap();
        }
        a.tick(&a_pipe, 0);

        // Every third datagram of the first transmission is lost.
        for (i, datagram) in a_pipe.take().into_iter().enumerate() {
            if i % 3 != 0 {
                b.on_datagram(10, &datagram, &mut b_events, &b_pipe);
            }
        }
        assert!(b_events.messages.len() < 100);

        // The retransmit pass fills the holes; duplicates are suppressed.
        a.tick(&a_pipe, 4000);
        pump(&a, &b, &a_pipe, &mut b_events, &b_pipe, 4010);

        assert_eq!(b_events.messages.len(), 100);
        for (i, msg) in b_events.messages.iter().enumerate() {
            assert_eq!(&msg[..4], (i as u32).to_le_bytes());
        }
    }

    #[test]
    fn test_unreliable_delivery() {
        let a = Transport::new(500, 1450);
        let b = Transport::new(500, 1450);
        let a_pipe = CapturePipe::new();
        let b_pipe = CapturePipe::new();
        let mut b_events = CaptureEvents::default();

        a.write_unreliable(b"datagramish").unwrap();
        a.flush_write(&a_pipe, 0);
        pump(&a, &b, &a_pipe, &mut b_events, &b_pipe, 5);
        assert_eq!(b_events.messages, vec![b"datagramish".to_vec()]);
    }

    #[test]
    fn test_large_message_reassembles() {
        let a = Transport::new(1381, 1450);
        let b = Transport::new(1381, 1450);
        let a_pipe = CapturePipe::new();
        let b_pipe = CapturePipe::new();
        let mut b_events = CaptureEvents::default();

        let payload: Vec<u8> = (0..30_000u32).map(|i| (i % 251) as u8).collect();
        a.write_reliable(StreamMode::Ordered2, &payload, SuperOp::Data)
            .unwrap();
        a.tick(&a_pipe, 0);
        pump(&a, &b, &a_pipe, &mut b_events, &b_pipe, 10);

        assert_eq!(b_events.messages.len(), 1);
        assert_eq!(b_events.messages[0], payload);
    }

    #[test]
    fn test_mtu_probe_learns_up() {
        let a = Transport::new(509, 1450);
        let b = Transport::new(509, 1450);
        let a_pipe = CapturePipe::new();
        let b_pipe = CapturePipe::new();
        let mut b_events = CaptureEvents::default();
        let mut a_events = CaptureEvents::default();

        assert!(a.post_mtu_probe(&a_pipe, 1450, 0));
        let probes = a_pipe.take();
        assert_eq!(probes.len(), 1);
        assert_eq!(probes[0].len(), 1450);

        b.on_datagram(5, &probes[0], &mut b_events, &b_pipe);
        // Receiver advertises the learned size within one tick.
        b.tick(&b_pipe, 20);
        for datagram in b_pipe.take() {
            a.on_datagram(30, &datagram, &mut a_events, &a_pipe);
        }
        assert_eq!(a.max_payload(), 1450);

        // A smaller probe afterwards never lowers the budget.
        b.raise_max_payload(1450);
        assert_eq!(b.max_payload(), 1450);
        let ok = a.post_mtu_probe(&a_pipe, 600, 40);
        assert!(ok);
        b.on_datagram(50, &a_pipe.take()[0], &mut b_events, &b_pipe);
        b.tick(&b_pipe, 60);
        for datagram in b_pipe.take() {
            a.on_datagram(70, &datagram, &mut a_events, &a_pipe);
        }
        assert_eq!(a.max_payload(), 1450);
    }

    #[test]
    fn test_time_ping_pong_updates_clock() {
        let client = Transport::new(500, 1450);
        let server = Transport::new(500, 1450);
        let client_pipe = CapturePipe::new();
        let server_pipe = CapturePipe::new();
        let mut client_events = CaptureEvents::default();
        let mut server_events = CaptureEvents::default();

        client.post_time_ping(&client_pipe, 1_000);
        let ping = client_pipe.take();
        // Server clock runs 500 ms ahead; it stamps its own receive time.
        server.on_datagram(1_520, &ping[0], &mut server_events, &server_pipe);
        let pong = server_pipe.take();
        assert_eq!(pong.len(), 1);
        client.on_datagram(1_040, &pong[0], &mut client_events, &client_pipe);

        assert_eq!(client_events.clock_updates.len(), 1);
        let (rtt, delta) = client_events.clock_updates[0];
        assert_eq!(rtt, 40);
        assert_eq!(delta, 500);
        assert_eq!(client.to_server_time(2_000), 2_500);
    }

    #[test]
    fn test_disco_surfaces_reason() {
        let a = Transport::new(500, 1450);
        let b = Transport::new(500, 1450);
        let a_pipe = CapturePipe::new();
        let b_pipe = CapturePipe::new();
        let mut b_events = CaptureEvents::default();

        a.post_disconnect(&a_pipe, DisconnectReason::Shutdown, 0);
        pump(&a, &b, &a_pipe, &mut b_events, &b_pipe, 5);
        assert_eq!(b_events.disconnects, vec![DisconnectReason::Shutdown]);
    }

    #[test]
    fn test_garbage_datagram_is_inert() {
        let b = Transport::new(500, 1450);
        let b_pipe = CapturePipe::new();
        let mut b_events = CaptureEvents::default();

        b.on_datagram(0, &[0xFF, 0xFF, 0x03], &mut b_events, &b_pipe);
        b.on_datagram(0, &[], &mut b_events, &b_pipe);
        assert!(b_events.messages.is_empty());
        assert!(b_events.disconnects.is_empty());
        assert!(b_pipe.take().is_empty());
    }

    #[test]
    fn test_submission_order_survives_id_wrap() {
        let a = Transport::new(500, 1450);
        let b = Transport::new(500, 1450);
        let a_pipe = CapturePipe::new();
        let b_pipe = CapturePipe::new();
        let mut b_events = CaptureEvents::default();

        // Jump both sides to the edge of the id space, as if 2^20 - 2
        // messages had already been exchanged.
        {
            let mut state = a.send.lock().unwrap();
            state.engine.seed_stream_for_tests(StreamMode::Ordered1, (1 << 20) - 2);
        }
        {
            let mut recv = b.recv.lock().unwrap();
            recv.seed_stream_for_tests(StreamMode::Ordered1, (1 << 20) - 2);
        }

        for i in 0..6u8 {
            a.write_reliable(StreamMode::Ordered1, &[i], SuperOp::Data)
                .unwrap();
        }
        a.tick(&a_pipe, 0);
        pump(&a, &b, &a_pipe, &mut b_events, &b_pipe, 5);
        let received: Vec<u8> = b_events.messages.iter().map(|m| m[0]).collect();
        assert_eq!(received, vec![0, 1, 2, 3, 4, 5]);
    }
}
