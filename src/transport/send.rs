//! Reliable-send engine.
//!
//! Each stream keeps a FIFO queue of messages not yet on the wire and a
//! sent list of messages awaiting acknowledgment. Internally ids are
//! expanded to monotonic `u64`s; the 20-bit wrap exists only at the codec.
//!
//! Flushing walks the streams in order and coalesces queued messages into
//! datagrams: the ACK-ID field is emitted once and implied (+1 per
//! reliable message) for the rest of a run, and a message that cannot fit
//! is split into FRAG slices carrying a 16-bit total-length header on the
//! first slice. Retransmission re-encodes a message with the full
//! three-byte ACK-ID since the receiver's expectation is then unknown.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::core::constants::{ACK_ID_MASK, FRAG_THRESHOLD, MAX_MESSAGE_DATALEN, NUM_STREAMS};
use crate::core::error::TransportError;
use crate::transport::expand_seq;
use crate::wire::ack_id::{self, MAX_ACK_ID_BYTES};
use crate::wire::header::{MessageHeader, StreamMode, SuperOp, MAX_HEADER_DATALEN};
use crate::wire::{ack, StreamAck};

/// Message accepted by `write_reliable`, waiting to go on the wire.
struct PendingMessage {
    sop: SuperOp,
    data: Arc<[u8]>,
    /// Bytes already carved off into fragment slices.
    sent_bytes: usize,
    /// The first slice has gone out; the rest must follow as FRAGs.
    fragmented: bool,
}

/// Out-of-band unreliable message waiting for the next datagram.
struct OobMessage {
    sop: SuperOp,
    data: Vec<u8>,
}

/// A message (or fragment slice) on the wire, awaiting ACK.
struct SentRecord {
    sop: SuperOp,
    data: Arc<[u8]>,
    offset: usize,
    len: usize,
    /// Total reassembled size, present on the first fragment slice only.
    frag_total: Option<u16>,
    ts_first: u32,
    ts_last: u32,
    retransmitted: bool,
}

struct StreamSend {
    next_id: u64,
    /// Latest rollup received from the remote receiver.
    remote_expected: u64,
    queue: VecDeque<PendingMessage>,
    sent: BTreeMap<u64, SentRecord>,
}

impl StreamSend {
    fn new() -> Self {
        Self {
            next_id: 0,
            remote_expected: 0,
            queue: VecDeque::new(),
            sent: BTreeMap::new(),
        }
    }
}

/// Builds outbound datagram payloads up to the payload limit.
struct Writer<'a> {
    out: &'a mut Vec<Vec<u8>>,
    buf: Vec<u8>,
    max_payload: usize,
    /// (stream, id) the receiver's running ACK-ID would imply next.
    cont: Option<(StreamMode, u32)>,
}

impl<'a> Writer<'a> {
    fn new(max_payload: usize, out: &'a mut Vec<Vec<u8>>) -> Self {
        Self {
            out,
            buf: Vec::with_capacity(max_payload),
            max_payload,
            cont: None,
        }
    }

    fn space(&self) -> usize {
        self.max_payload.saturating_sub(self.buf.len())
    }

    fn flush_datagram(&mut self) {
        if !self.buf.is_empty() {
            let full = std::mem::replace(&mut self.buf, Vec::with_capacity(self.max_payload));
            self.out.push(full);
        }
        self.cont = None;
    }

    fn finish(&mut self) {
        self.flush_datagram();
    }

    /// Append one reliable message; the caller has verified it fits.
    #[allow(clippy::too_many_arguments)]
    fn push_reliable(
        &mut self,
        stream: StreamMode,
        id20: u32,
        id_len: usize,
        sop: SuperOp,
        frag_total: Option<u16>,
        data: &[u8],
        offset: usize,
        len: usize,
    ) {
        let frag_bytes = if frag_total.is_some() { 2 } else { 0 };
        let header = MessageHeader {
            data_bytes: (len + frag_bytes) as u16,
            has_ack_id: id_len > 0,
            reliable: true,
            sop,
        };
        self.buf.extend_from_slice(&header.encode());
        if id_len > 0 {
            ack_id::encode(stream, id20, id_len, &mut self.buf);
        }
        if let Some(total) = frag_total {
            self.buf.extend_from_slice(&total.to_le_bytes());
        }
        self.buf.extend_from_slice(&data[offset..offset + len]);
        self.cont = Some((stream, (id20 + 1) & ACK_ID_MASK));
    }
}

/// Per-connection reliable-send state.
pub(crate) struct SendEngine {
    streams: [StreamSend; NUM_STREAMS],
    unreliable: VecDeque<OobMessage>,
}

impl SendEngine {
    pub fn new() -> Self {
        Self {
            streams: [
                StreamSend::new(),
                StreamSend::new(),
                StreamSend::new(),
                StreamSend::new(),
            ],
            unreliable: VecDeque::new(),
        }
    }

    /// Queue a reliable message; it receives its ids at flush time.
    pub fn write_reliable(
        &mut self,
        stream: StreamMode,
        data: &[u8],
        sop: SuperOp,
    ) -> Result<(), TransportError> {
        if data.is_empty() {
            return Err(TransportError::EmptyMessage);
        }
        if data.len() > MAX_MESSAGE_DATALEN {
            return Err(TransportError::MessageTooLarge {
                bytes: data.len(),
                max: MAX_MESSAGE_DATALEN,
            });
        }
        self.streams[stream.index()].queue.push_back(PendingMessage {
            sop,
            data: Arc::from(data),
            sent_bytes: 0,
            fragmented: false,
        });
        Ok(())
    }

    /// Queue an unreliable message for the next datagram.
    pub fn write_unreliable(
        &mut self,
        sop: SuperOp,
        data: &[u8],
        max_payload: usize,
    ) -> Result<(), TransportError> {
        let max = max_payload
            .saturating_sub(MessageHeader::SIZE)
            .min(MAX_HEADER_DATALEN);
        if data.len() > max {
            return Err(TransportError::MessageTooLarge { bytes: data.len(), max });
        }
        self.unreliable.push_back(OobMessage {
            sop,
            data: data.to_vec(),
        });
        Ok(())
    }

    /// Anything waiting to go out (queued data or pending unreliable)?
    pub fn has_queued(&self) -> bool {
        !self.unreliable.is_empty() || self.streams.iter().any(|s| !s.queue.is_empty())
    }

    /// Messages on the wire awaiting acknowledgment.
    pub fn in_flight(&self) -> usize {
        self.streams.iter().map(|s| s.sent.len()).sum()
    }

    /// Assemble pending ACKs, unreliable messages, and queued reliable
    /// messages into datagram payloads.
    pub fn flush(
        &mut self,
        acks: &[StreamAck],
        max_payload: usize,
        now: u32,
        out: &mut Vec<Vec<u8>>,
    ) {
        let mut w = Writer::new(max_payload, out);
        self.emit_acks(acks, &mut w);
        self.emit_unreliable(&mut w);
        for stream in StreamMode::ALL {
            self.drain_stream(stream, now, &mut w);
        }
        w.finish();
    }

    fn emit_acks(&mut self, acks: &[StreamAck], w: &mut Writer<'_>) {
        if acks.is_empty() {
            return;
        }
        let mut body = Vec::new();
        ack::encode(acks, &mut body);
        if MessageHeader::SIZE + body.len() > w.max_payload {
            // Pathological reorder: fall back to rollups alone.
            body.clear();
            let rollups: Vec<StreamAck> = acks
                .iter()
                .map(|b| StreamAck {
                    stream: b.stream,
                    rollup: b.rollup,
                    ranges: Vec::new(),
                })
                .collect();
            ack::encode(&rollups, &mut body);
        }
        if MessageHeader::SIZE + body.len() > w.space() {
            w.flush_datagram();
        }
        let header = MessageHeader {
            data_bytes: body.len() as u16,
            has_ack_id: false,
            reliable: false,
            sop: SuperOp::Ack,
        };
        w.buf.extend_from_slice(&header.encode());
        w.buf.extend_from_slice(&body);
    }

    fn emit_unreliable(&mut self, w: &mut Writer<'_>) {
        loop {
            let need = match self.unreliable.front() {
                Some(front) => MessageHeader::SIZE + front.data.len(),
                None => return,
            };
            if need > w.max_payload {
                // Limit shrank below the message; cannot happen, drop it.
                self.unreliable.pop_front();
                continue;
            }
            if need > w.space() {
                w.flush_datagram();
            }
            let Some(msg) = self.unreliable.pop_front() else { return };
            let header = MessageHeader {
                data_bytes: msg.data.len() as u16,
                has_ack_id: false,
                reliable: false,
                sop: msg.sop,
            };
            w.buf.extend_from_slice(&header.encode());
            w.buf.extend_from_slice(&msg.data);
        }
    }

    fn drain_stream(&mut self, stream: StreamMode, now: u32, w: &mut Writer<'_>) {
        let s = &mut self.streams[stream.index()];
        loop {
            let Some(front) = s.queue.front() else { return };
            let remaining = front.data.len() - front.sent_bytes;
            let continuing = front.fragmented;

            let id20 = (s.next_id & ACK_ID_MASK as u64) as u32;
            let remote20 = (s.remote_expected & ACK_ID_MASK as u64) as u32;
            let id_len = match w.cont {
                Some((cs, ci)) if cs == stream && ci == id20 => 0,
                _ => ack_id::encoded_len(id20, remote20),
            };

            if !continuing && MessageHeader::SIZE + id_len + remaining <= w.space() {
                let Some(msg) = s.queue.pop_front() else { return };
                w.push_reliable(stream, id20, id_len, msg.sop, None, &msg.data, 0, remaining);
                s.sent.insert(
                    s.next_id,
                    SentRecord {
                        sop: msg.sop,
                        data: msg.data,
                        offset: 0,
                        len: remaining,
                        frag_total: None,
                        ts_first: now,
                        ts_last: now,
                        retransmitted: false,
                    },
                );
                s.next_id += 1;
                continue;
            }

            // Fragment: the message (or its tail) does not fit whole.
            let frag_header = if continuing { 0 } else { 2 };
            let min_need =
                MessageHeader::SIZE + id_len + frag_header + FRAG_THRESHOLD.min(remaining);
            if min_need > w.space() {
                if w.buf.is_empty() {
                    // Payload limit too small to make progress; leave the
                    // message queued rather than spin.
                    return;
                }
                w.flush_datagram();
                continue;
            }

            let budget = w.space() - MessageHeader::SIZE - id_len - frag_header;
            let slice_len = remaining.min(budget).min(MAX_HEADER_DATALEN - frag_header);

            let Some(front) = s.queue.front_mut() else { return };
            let total = front.data.len() as u16;
            let offset = front.sent_bytes;
            let first = !front.fragmented;
            let data = Arc::clone(&front.data);
            front.fragmented = true;
            front.sent_bytes += slice_len;
            let done = front.sent_bytes == front.data.len();
            if done {
                s.queue.pop_front();
            }

            let frag_total = if first { Some(total) } else { None };
            w.push_reliable(
                stream,
                id20,
                id_len,
                SuperOp::Frag,
                frag_total,
                &data,
                offset,
                slice_len,
            );
            s.sent.insert(
                s.next_id,
                SentRecord {
                    sop: SuperOp::Frag,
                    data,
                    offset,
                    len: slice_len,
                    frag_total,
                    ts_first: now,
                    ts_last: now,
                    retransmitted: false,
                },
            );
            s.next_id += 1;
        }
    }

    /// Re-encode every timed-out sent message with its full ACK-ID.
    pub fn retransmit_due(
        &mut self,
        now: u32,
        rto_ms: u32,
        max_payload: usize,
        out: &mut Vec<Vec<u8>>,
    ) {
        let mut w = Writer::new(max_payload, out);
        for stream in StreamMode::ALL {
            let s = &mut self.streams[stream.index()];
            for (&id, rec) in s.sent.iter_mut() {
                if now.wrapping_sub(rec.ts_last) < rto_ms {
                    continue;
                }
                let frag_bytes = if rec.frag_total.is_some() { 2 } else { 0 };
                let need = MessageHeader::SIZE + MAX_ACK_ID_BYTES + frag_bytes + rec.len;
                if need > w.space() {
                    w.flush_datagram();
                }
                let header = MessageHeader {
                    data_bytes: (rec.len + frag_bytes) as u16,
                    has_ack_id: true,
                    reliable: true,
                    sop: rec.sop,
                };
                w.buf.extend_from_slice(&header.encode());
                ack_id::encode(
                    stream,
                    (id & ACK_ID_MASK as u64) as u32,
                    MAX_ACK_ID_BYTES,
                    &mut w.buf,
                );
                if let Some(total) = rec.frag_total {
                    w.buf.extend_from_slice(&total.to_le_bytes());
                }
                w.buf.extend_from_slice(&rec.data[rec.offset..rec.offset + rec.len]);
                rec.ts_last = now;
                rec.retransmitted = true;
                // Full ids for everything retransmitted; no continuation.
                w.cont = None;
            }
        }
        w.finish();
    }

    /// Jump a stream's id state, standing in for prior traffic.
    #[cfg(test)]
    pub(crate) fn seed_stream_for_tests(&mut self, stream: StreamMode, id: u64) {
        let s = &mut self.streams[stream.index()];
        s.next_id = id;
        s.remote_expected = id;
    }

    /// Process an ACK body. Returns RTT samples (from never-retransmitted
    /// messages only, sidestepping retransmission ambiguity).
    pub fn on_ack(&mut self, blocks: &[StreamAck], now: u32) -> Vec<u32> {
        let mut samples = Vec::new();
        for block in blocks {
            let s = &mut self.streams[block.stream.index()];
            let rollup = expand_seq(block.rollup, s.remote_expected).min(s.next_id);
            if rollup > s.remote_expected {
                s.remote_expected = rollup;
            }
            let keep = s.sent.split_off(&rollup);
            let acked = std::mem::replace(&mut s.sent, keep);
            for rec in acked.into_values() {
                if !rec.retransmitted {
                    samples.push(now.wrapping_sub(rec.ts_first));
                }
            }
            let mut prev = rollup;
            for &(start20, end20) in &block.ranges {
                let start = expand_seq(start20, prev);
                let end = expand_seq(end20, start);
                if end < start || start < rollup || start >= s.next_id {
                    continue;
                }
                let ids: Vec<u64> = s.sent.range(start..=end).map(|(&k, _)| k).collect();
                for k in ids {
                    if let Some(rec) = s.sent.remove(&k) {
                        if !rec.retransmitted {
                            samples.push(now.wrapping_sub(rec.ts_first));
                        }
                    }
                }
                prev = end;
            }
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flush_one(engine: &mut SendEngine, max_payload: usize, now: u32) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        engine.flush(&[], max_payload, now, &mut out);
        out
    }

    /// Walk a datagram and return (reliable, stream, explicit_id, sop,
    /// data) per message, tracking the running ACK-ID like a receiver.
    fn parse(datagram: &[u8]) -> Vec<(bool, Option<StreamMode>, Option<u32>, SuperOp, Vec<u8>)> {
        let mut msgs = Vec::new();
        let mut off = 0;
        let mut cont: Option<(StreamMode, u32)> = None;
        while off < datagram.len() {
            let hdr = MessageHeader::decode(&datagram[off..]).unwrap();
            off += 2;
            let mut explicit = None;
            if hdr.has_ack_id {
                let (field, n) = ack_id::decode(&datagram[off..]).unwrap();
                off += n;
                let id = ack_id::reconstruct(field.partial, field.bits, 0);
                cont = Some((field.stream, id));
                explicit = Some(id);
            }
            let body = datagram[off..off + hdr.data_bytes as usize].to_vec();
            off += hdr.data_bytes as usize;
            if hdr.reliable {
                let (stream, id) = cont.expect("reliable without id context");
                msgs.push((true, Some(stream), explicit.or(Some(id)), hdr.sop, body));
                cont = Some((stream, (id + 1) & ACK_ID_MASK));
            } else {
                msgs.push((false, None, None, hdr.sop, body));
            }
        }
        msgs
    }

    #[test]
    fn test_small_messages_coalesce_into_one_datagram() {
        let mut engine = SendEngine::new();
        for i in 0..5u8 {
            engine
                .write_reliable(StreamMode::Ordered1, &[i; 10], SuperOp::Data)
                .unwrap();
        }
        let out = flush_one(&mut engine, 500, 100);
        assert_eq!(out.len(), 1);
        let msgs = parse(&out[0]);
        assert_eq!(msgs.len(), 5);
        assert_eq!(msgs[0].2, Some(0));
        for (i, msg) in msgs.iter().enumerate() {
            assert_eq!(msg.4, vec![i as u8; 10]);
        }
        assert_eq!(engine.in_flight(), 5);
    }

    #[test]
    fn test_exact_fit_does_not_fragment() {
        let mut engine = SendEngine::new();
        let max_payload = 500;
        // Header (2) + one-byte ACK-ID leaves this much for data.
        let fit = max_payload - MessageHeader::SIZE - 1;
        engine
            .write_reliable(StreamMode::Ordered1, &vec![7u8; fit], SuperOp::Data)
            .unwrap();
        let out = flush_one(&mut engine, max_payload, 0);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].len(), max_payload);
        let msgs = parse(&out[0]);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].3, SuperOp::Data);
    }

    #[test]
    fn test_one_byte_larger_fragments_in_two() {
        let mut engine = SendEngine::new();
        let max_payload = 500;
        let fit = max_payload - MessageHeader::SIZE - 1;
        engine
            .write_reliable(StreamMode::Ordered1, &vec![7u8; fit + 1], SuperOp::Data)
            .unwrap();
        let out = flush_one(&mut engine, max_payload, 0);
        // First slice fills a datagram; the tail follows in a second one.
        assert_eq!(out.len(), 2);
        let first = parse(&out[0]);
        let second = parse(&out[1]);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].3, SuperOp::Frag);
        assert_eq!(second[0].3, SuperOp::Frag);
        // First slice data starts with the 16-bit total.
        let total = u16::from_le_bytes([first[0].4[0], first[0].4[1]]) as usize;
        assert_eq!(total, fit + 1);
        let reassembled_len = (first[0].4.len() - 2) + second[0].4.len();
        assert_eq!(reassembled_len, fit + 1);
    }

    #[test]
    fn test_large_message_fragment_slices_cover_payload() {
        let mut engine = SendEngine::new();
        let payload: Vec<u8> = (0..30_000u32).map(|i| i as u8).collect();
        engine
            .write_reliable(StreamMode::Ordered2, &payload, SuperOp::Data)
            .unwrap();
        let out = flush_one(&mut engine, 1381, 0);
        let mut reassembled = Vec::new();
        let mut total = 0usize;
        for datagram in &out {
            for (reliable, _, _, sop, body) in parse(datagram) {
                assert!(reliable);
                assert_eq!(sop, SuperOp::Frag);
                if reassembled.is_empty() && total == 0 {
                    total = u16::from_le_bytes([body[0], body[1]]) as usize;
                    reassembled.extend_from_slice(&body[2..]);
                } else {
                    reassembled.extend_from_slice(&body);
                }
            }
        }
        assert_eq!(total, payload.len());
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn test_rollup_clears_sent_list() {
        let mut engine = SendEngine::new();
        for _ in 0..4 {
            engine
                .write_reliable(StreamMode::Ordered1, b"abc", SuperOp::Data)
                .unwrap();
        }
        flush_one(&mut engine, 500, 0);
        assert_eq!(engine.in_flight(), 4);

        // Rollup of 3 acknowledges ids 0..=2.
        let samples = engine.on_ack(
            &[StreamAck {
                stream: StreamMode::Ordered1,
                rollup: 3,
                ranges: vec![],
            }],
            50,
        );
        assert_eq!(engine.in_flight(), 1);
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|&s| s == 50));
    }

    #[test]
    fn test_range_ack_leaves_holes() {
        let mut engine = SendEngine::new();
        for _ in 0..6 {
            engine
                .write_reliable(StreamMode::Ordered1, b"x", SuperOp::Data)
                .unwrap();
        }
        flush_one(&mut engine, 500, 0);

        // Acks ids 0 and 3..=4; ids 1, 2, 5 remain in flight.
        engine.on_ack(
            &[StreamAck {
                stream: StreamMode::Ordered1,
                rollup: 1,
                ranges: vec![(3, 4)],
            }],
            10,
        );
        assert_eq!(engine.in_flight(), 3);
    }

    #[test]
    fn test_retransmit_uses_full_ack_id_and_karn_rule() {
        let mut engine = SendEngine::new();
        engine
            .write_reliable(StreamMode::Ordered1, b"retry me", SuperOp::Data)
            .unwrap();
        flush_one(&mut engine, 500, 0);

        let mut out = Vec::new();
        engine.retransmit_due(1000, 200, 500, &mut out);
        assert_eq!(out.len(), 1);
        let msgs = parse(&out[0]);
        assert_eq!(msgs.len(), 1);
        // Full three-byte field: header(2) + ack-id(3) + data.
        assert_eq!(out[0].len(), 2 + 3 + 8);

        // A retransmitted message must not produce an RTT sample.
        let samples = engine.on_ack(
            &[StreamAck {
                stream: StreamMode::Ordered1,
                rollup: 1,
                ranges: vec![],
            }],
            1200,
        );
        assert!(samples.is_empty());
        assert_eq!(engine.in_flight(), 0);
    }

    #[test]
    fn test_retransmit_respects_rto() {
        let mut engine = SendEngine::new();
        engine
            .write_reliable(StreamMode::Ordered1, b"hold", SuperOp::Data)
            .unwrap();
        flush_one(&mut engine, 500, 0);

        let mut out = Vec::new();
        engine.retransmit_due(100, 200, 500, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_unreliable_and_ack_share_datagram() {
        let mut engine = SendEngine::new();
        engine
            .write_unreliable(SuperOp::Data, b"loose", 500)
            .unwrap();
        let acks = [StreamAck {
            stream: StreamMode::Ordered1,
            rollup: 17,
            ranges: vec![],
        }];
        let mut out = Vec::new();
        engine.flush(&acks, 500, 0, &mut out);
        assert_eq!(out.len(), 1);
        let msgs = parse(&out[0]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].3, SuperOp::Ack);
        assert_eq!(msgs[1].3, SuperOp::Data);
        assert!(!msgs[1].0);
        assert_eq!(msgs[1].4, b"loose");
        let blocks = ack::decode(&msgs[0].4).unwrap();
        assert_eq!(blocks[0].rollup, 17);
    }

    #[test]
    fn test_write_limits() {
        let mut engine = SendEngine::new();
        assert!(matches!(
            engine.write_reliable(StreamMode::Ordered1, &[], SuperOp::Data),
            Err(TransportError::EmptyMessage)
        ));
        assert!(matches!(
            engine.write_reliable(StreamMode::Ordered1, &vec![0; 70_000], SuperOp::Data),
            Err(TransportError::MessageTooLarge { .. })
        ));
        assert!(matches!(
            engine.write_unreliable(SuperOp::Data, &vec![0; 600], 500),
            Err(TransportError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn test_id_wrap_keeps_flowing() {
        let mut engine = SendEngine::new();
        // Pretend the stream already consumed almost the whole id space.
        engine.streams[1].next_id = (1 << 20) - 2;
        engine.streams[1].remote_expected = (1 << 20) - 2;
        for _ in 0..4 {
            engine
                .write_reliable(StreamMode::Ordered1, b"wrap", SuperOp::Data)
                .unwrap();
        }
        flush_one(&mut engine, 500, 0);
        assert_eq!(engine.in_flight(), 4);

        // Remote delivers all four; its rollup wraps to id 2.
        engine.on_ack(
            &[StreamAck {
                stream: StreamMode::Ordered1,
                rollup: 2,
                ranges: vec![],
            }],
            10,
        );
        assert_eq!(engine.in_flight(), 0);
        assert_eq!(engine.streams[1].remote_expected, (1 << 20) + 2);
    }

    #[test]
    fn test_stale_ack_ignored() {
        let mut engine = SendEngine::new();
        engine
            .write_reliable(StreamMode::Ordered1, b"one", SuperOp::Data)
            .unwrap();
        flush_one(&mut engine, 500, 0);
        // Rollup far beyond anything sent must not disturb state.
        engine.on_ack(
            &[StreamAck {
                stream: StreamMode::Ordered1,
                rollup: 500_000,
                ranges: vec![(600_000, 600_005)],
            }],
            10,
        );
        // Clamped to next_id: the one in-flight message is acked, nothing
        // beyond that is invented.
        assert_eq!(engine.streams[1].remote_expected, 1);
    }
}
