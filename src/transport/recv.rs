//! Reliable-recv engine.
//!
//! Tracks the next expected id per stream, suppresses duplicates, reorders
//! ahead-of-sequence messages, reassembles fragments, and snapshots the
//! acknowledgment state the sender piggybacks onto outbound datagrams.
//!
//! Ordered streams (1-3) hold out-of-order messages until the gap closes.
//! The unordered stream (0) delivers immediately and only remembers ids
//! for duplicate suppression and ACK reporting. At most one fragment
//! reassembly is in progress per stream, and FRAG may only appear on
//! ordered streams.

use std::collections::BTreeMap;

use tracing::warn;

use crate::core::constants::{ACK_ID_MASK, MAX_MESSAGE_DATALEN, NUM_STREAMS};
use crate::transport::expand_seq;
use crate::wire::header::{StreamMode, SuperOp};
use crate::wire::StreamAck;

/// A message handed up by the engine once it is deliverable.
pub(crate) struct Delivery {
    /// Super-opcode the message was submitted with (`Data` for
    /// reassembled fragments).
    pub sop: SuperOp,
    /// Complete message bytes.
    pub data: Vec<u8>,
}

enum Queued {
    /// Ordered stream: message held until the gap before it closes.
    Held {
        sop: SuperOp,
        frag: bool,
        data: Vec<u8>,
    },
    /// Unordered stream: already delivered, id kept for dup suppression.
    Delivered,
}

struct FragBuffer {
    total: usize,
    data: Vec<u8>,
}

struct StreamRecv {
    next_expected: u64,
    queue: BTreeMap<u64, Queued>,
    frag: Option<FragBuffer>,
}

impl StreamRecv {
    fn new() -> Self {
        Self {
            next_expected: 0,
            queue: BTreeMap::new(),
            frag: None,
        }
    }

    /// Consume an in-order message: append to the fragment buffer or
    /// deliver directly.
    fn accept(&mut self, ordered: bool, sop: SuperOp, frag: bool, data: Vec<u8>, out: &mut Vec<Delivery>) {
        if !frag {
            out.push(Delivery { sop, data });
            return;
        }
        if !ordered {
            warn!("dropping fragment on unordered stream");
            return;
        }
        match self.frag.take() {
            None => {
                if data.len() < 2 {
                    warn!("fragment head too short");
                    return;
                }
                let total = u16::from_le_bytes([data[0], data[1]]) as usize;
                if total == 0 || total > MAX_MESSAGE_DATALEN || data.len() - 2 > total {
                    warn!(total, "invalid fragment header");
                    return;
                }
                let mut buf = Vec::with_capacity(total);
                buf.extend_from_slice(&data[2..]);
                if buf.len() == total {
                    out.push(Delivery { sop: SuperOp::Data, data: buf });
                } else {
                    self.frag = Some(FragBuffer { total, data: buf });
                }
            }
            Some(mut fb) => {
                if fb.data.len() + data.len() > fb.total {
                    warn!("fragment overflow, dropping reassembly");
                    return;
                }
                fb.data.extend_from_slice(&data);
                if fb.data.len() == fb.total {
                    out.push(Delivery { sop: SuperOp::Data, data: fb.data });
                } else {
                    self.frag = Some(fb);
                }
            }
        }
    }
}

/// Per-connection reliable-recv state.
pub(crate) struct RecvEngine {
    streams: [StreamRecv; NUM_STREAMS],
    got_reliable: [bool; NUM_STREAMS],
}

impl RecvEngine {
    pub fn new() -> Self {
        Self {
            streams: [
                StreamRecv::new(),
                StreamRecv::new(),
                StreamRecv::new(),
                StreamRecv::new(),
            ],
            got_reliable: [false; NUM_STREAMS],
        }
    }

    /// The 20-bit id the stream expects next; ACK-ID reconstruction is
    /// relative to this.
    pub fn expected20(&self, stream: StreamMode) -> u32 {
        (self.streams[stream.index()].next_expected & ACK_ID_MASK as u64) as u32
    }

    /// Process one reliable message with reconstructed 20-bit id `id20`.
    pub fn on_reliable(
        &mut self,
        stream: StreamMode,
        id20: u32,
        sop: SuperOp,
        frag: bool,
        data: &[u8],
        out: &mut Vec<Delivery>,
    ) {
        let ordered = stream.is_ordered();
        let s = &mut self.streams[stream.index()];
        // Even a duplicate warrants an ACK so the sender stops resending.
        self.got_reliable[stream.index()] = true;

        let id = expand_seq(id20, s.next_expected);
        if id < s.next_expected {
            return; // duplicate of something already delivered
        }
        if id == s.next_expected {
            s.accept(ordered, sop, frag, data.to_vec(), out);
            s.next_expected += 1;
            // Drain whatever became contiguous.
            while let Some(entry) = s.queue.remove(&s.next_expected) {
                if let Queued::Held { sop, frag, data } = entry {
                    s.accept(ordered, sop, frag, data, out);
                }
                s.next_expected += 1;
            }
            return;
        }
        // Ahead of sequence.
        if s.queue.contains_key(&id) {
            return; // duplicate of something already queued
        }
        if ordered {
            s.queue.insert(
                id,
                Queued::Held {
                    sop,
                    frag,
                    data: data.to_vec(),
                },
            );
        } else {
            if frag {
                warn!("dropping fragment on unordered stream");
                return;
            }
            out.push(Delivery { sop, data: data.to_vec() });
            s.queue.insert(id, Queued::Delivered);
        }
    }

    /// Jump a stream's expectation, standing in for prior traffic.
    #[cfg(test)]
    pub(crate) fn seed_stream_for_tests(&mut self, stream: StreamMode, id: u64) {
        self.streams[stream.index()].next_expected = id;
    }

    /// Any stream waiting to acknowledge?
    pub fn has_pending_ack(&self) -> bool {
        self.got_reliable.iter().any(|&g| g)
    }

    /// Snapshot and clear the per-stream ACK state.
    pub fn take_ack_blocks(&mut self) -> Vec<StreamAck> {
        let mut blocks = Vec::new();
        for stream in StreamMode::ALL {
            let i = stream.index();
            if !self.got_reliable[i] {
                continue;
            }
            self.got_reliable[i] = false;
            let s = &self.streams[i];
            let mut ranges: Vec<(u32, u32)> = Vec::new();
            let mut run: Option<(u64, u64)> = None;
            for &id in s.queue.keys() {
                match run {
                    Some((start, end)) if id == end + 1 => run = Some((start, id)),
                    Some((start, end)) => {
                        ranges.push(wire_range(start, end));
                        run = Some((id, id));
                    }
                    None => run = Some((id, id)),
                }
            }
            if let Some((start, end)) = run {
                ranges.push(wire_range(start, end));
            }
            blocks.push(StreamAck {
                stream,
                rollup: (s.next_expected & ACK_ID_MASK as u64) as u32,
                ranges,
            });
        }
        blocks
    }
}

fn wire_range(start: u64, end: u64) -> (u32, u32) {
    (
        (start & ACK_ID_MASK as u64) as u32,
        (end & ACK_ID_MASK as u64) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deliver(
        engine: &mut RecvEngine,
        stream: StreamMode,
        id: u32,
        data: &[u8],
    ) -> Vec<Delivery> {
        let mut out = Vec::new();
        engine.on_reliable(stream, id, SuperOp::Data, false, data, &mut out);
        out
    }

    fn deliver_frag(
        engine: &mut RecvEngine,
        stream: StreamMode,
        id: u32,
        data: &[u8],
    ) -> Vec<Delivery> {
        let mut out = Vec::new();
        engine.on_reliable(stream, id, SuperOp::Frag, true, data, &mut out);
        out
    }

    #[test]
    fn test_in_order_delivery() {
        let mut engine = RecvEngine::new();
        for i in 0..5u32 {
            let out = deliver(&mut engine, StreamMode::Ordered1, i, &[i as u8]);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].data, vec![i as u8]);
        }
        assert_eq!(engine.expected20(StreamMode::Ordered1), 5);
    }

    #[test]
    fn test_reorder_holds_until_gap_closes() {
        let mut engine = RecvEngine::new();
        assert!(deliver(&mut engine, StreamMode::Ordered1, 2, b"c").is_empty());
        assert!(deliver(&mut engine, StreamMode::Ordered1, 1, b"b").is_empty());
        let out = deliver(&mut engine, StreamMode::Ordered1, 0, b"a");
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].data, b"a");
        assert_eq!(out[1].data, b"b");
        assert_eq!(out[2].data, b"c");
    }

    #[test]
    fn test_duplicates_dropped_but_acked() {
        let mut engine = RecvEngine::new();
        deliver(&mut engine, StreamMode::Ordered1, 0, b"x");
        engine.take_ack_blocks();
        assert!(!engine.has_pending_ack());

        // Replay of the delivered id: no delivery, but an ACK is owed.
        let out = deliver(&mut engine, StreamMode::Ordered1, 0, b"x");
        assert!(out.is_empty());
        assert!(engine.has_pending_ack());

        // Duplicate of a queued-ahead id is dropped too.
        deliver(&mut engine, StreamMode::Ordered1, 3, b"y");
        let out = deliver(&mut engine, StreamMode::Ordered1, 3, b"y");
        assert!(out.is_empty());
    }

    #[test]
    fn test_unordered_delivers_immediately() {
        let mut engine = RecvEngine::new();
        let out = deliver(&mut engine, StreamMode::Unordered, 3, b"late");
        assert_eq!(out.len(), 1);
        // Replay of the out-of-order id is suppressed.
        assert!(deliver(&mut engine, StreamMode::Unordered, 3, b"late").is_empty());
        // Earlier ids still deliver once.
        assert_eq!(deliver(&mut engine, StreamMode::Unordered, 0, b"a").len(), 1);
        assert_eq!(deliver(&mut engine, StreamMode::Unordered, 1, b"b").len(), 1);
        assert_eq!(deliver(&mut engine, StreamMode::Unordered, 2, b"c").len(), 1);
        // Ids 0..=3 are now all consumed.
        assert_eq!(engine.expected20(StreamMode::Unordered), 4);
    }

    #[test]
    fn test_fragment_reassembly() {
        let mut engine = RecvEngine::new();
        let payload: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let mut head = (payload.len() as u16).to_le_bytes().to_vec();
        head.extend_from_slice(&payload[..100]);

        assert!(deliver_frag(&mut engine, StreamMode::Ordered1, 0, &head).is_empty());
        assert!(deliver_frag(&mut engine, StreamMode::Ordered1, 1, &payload[100..200]).is_empty());
        let out = deliver_frag(&mut engine, StreamMode::Ordered1, 2, &payload[200..]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sop, SuperOp::Data);
        assert_eq!(out[0].data, payload);
    }

    #[test]
    fn test_fragment_reassembly_survives_reorder() {
        let mut engine = RecvEngine::new();
        let payload: Vec<u8> = (0..200u32).map(|i| i as u8).collect();
        let mut head = (payload.len() as u16).to_le_bytes().to_vec();
        head.extend_from_slice(&payload[..80]);

        // Tail slices arrive before the head.
        assert!(deliver_frag(&mut engine, StreamMode::Ordered2, 1, &payload[80..160]).is_empty());
        assert!(deliver_frag(&mut engine, StreamMode::Ordered2, 2, &payload[160..]).is_empty());
        let out = deliver_frag(&mut engine, StreamMode::Ordered2, 0, &head);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data, payload);
    }

    #[test]
    fn test_concurrent_reassembly_per_stream() {
        let mut engine = RecvEngine::new();
        let payloads: Vec<Vec<u8>> = (1..4u8).map(|s| vec![s; 120]).collect();
        // Interleave heads and tails across streams 1-3.
        for (i, stream) in [StreamMode::Ordered1, StreamMode::Ordered2, StreamMode::Ordered3]
            .into_iter()
            .enumerate()
        {
            let mut head = (120u16).to_le_bytes().to_vec();
            head.extend_from_slice(&payloads[i][..60]);
            assert!(deliver_frag(&mut engine, stream, 0, &head).is_empty());
        }
        for (i, stream) in [StreamMode::Ordered1, StreamMode::Ordered2, StreamMode::Ordered3]
            .into_iter()
            .enumerate()
        {
            let out = deliver_frag(&mut engine, stream, 1, &payloads[i][60..]);
            assert_eq!(out.len(), 1);
            assert_eq!(out[0].data, payloads[i]);
        }
    }

    #[test]
    fn test_fragment_on_unordered_rejected() {
        let mut engine = RecvEngine::new();
        let mut head = 64u16.to_le_bytes().to_vec();
        head.extend_from_slice(&[0u8; 32]);
        let out = deliver_frag(&mut engine, StreamMode::Unordered, 0, &head);
        assert!(out.is_empty());
        // The id is still consumed and acked.
        assert_eq!(engine.expected20(StreamMode::Unordered), 1);
    }

    #[test]
    fn test_ack_snapshot_rollup_and_ranges() {
        let mut engine = RecvEngine::new();
        deliver(&mut engine, StreamMode::Ordered1, 0, b"a");
        deliver(&mut engine, StreamMode::Ordered1, 1, b"b");
        deliver(&mut engine, StreamMode::Ordered1, 3, b"d");
        deliver(&mut engine, StreamMode::Ordered1, 4, b"e");
        deliver(&mut engine, StreamMode::Ordered1, 7, b"h");

        let blocks = engine.take_ack_blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].stream, StreamMode::Ordered1);
        assert_eq!(blocks[0].rollup, 2);
        assert_eq!(blocks[0].ranges, vec![(3, 4), (7, 7)]);

        // Snapshot clears the flag until the next reliable arrival.
        assert!(engine.take_ack_blocks().is_empty());
    }

    #[test]
    fn test_delivery_across_id_wrap() {
        let mut engine = RecvEngine::new();
        let s = &mut engine.streams[StreamMode::Ordered1.index()];
        s.next_expected = (1 << 20) - 1;

        let out = deliver(&mut engine, StreamMode::Ordered1, ACK_ID_MASK, b"last");
        assert_eq!(out.len(), 1);
        // Expectation wrapped to wire id 0.
        assert_eq!(engine.expected20(StreamMode::Ordered1), 0);
        let out = deliver(&mut engine, StreamMode::Ordered1, 0, b"first");
        assert_eq!(out.len(), 1);
        assert_eq!(engine.expected20(StreamMode::Ordered1), 1);
    }
}
