//! TCP stream reassembly: orders segments by sequence
//! number, holds out-of-order segments until the gap closes, and runs the
//! parser composite over the contiguous prefix as it grows. A parser error
//! aborts the current message window, not the whole connection — the
//! buffered bytes up to that point are discarded and reassembly resumes
//! with the next segment.

pub mod modular_cmp;

use crate::decode::tcp_header::TcpHeader;
use crate::ipv4::Ipv4Address;
use crate::message::Message;
use crate::output::OutputPacket;
use crate::parser::ParserComposite;
use crate::transport::{FiveTuple, L4Protocol};
use modular_cmp::{mod_ge, mod_geq, mod_le};
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct TcpConfig {
    pub idle_ttl: Duration,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            idle_ttl: Duration::from_secs(60),
        }
    }
}

struct PendingSegment {
    seq: u32,
    payload: Vec<u8>,
}

struct TcpStream {
    composite: ParserComposite,
    buffer: Message,
    pending: Vec<PendingSegment>,
    next_seq: Option<u32>,
    fin_seq: Option<u32>,
    closed: bool,
    last_activity: Instant,
}

impl TcpStream {
    fn new(composite: ParserComposite, now: Instant) -> Self {
        Self {
            composite,
            buffer: Message::new(Vec::new()),
            pending: Vec::new(),
            next_seq: None,
            fin_seq: None,
            closed: false,
            last_activity: now,
        }
    }

    fn is_drained_and_closed(&self) -> bool {
        self.closed && self.buffer.is_empty() && self.pending.is_empty()
    }
}

/// Identifies a TCP connection independent of which direction a segment
/// travels, by sorting its two endpoints. `FiveTuple` itself is directional
/// (src/dst not normalized), so the forward and reverse halves of one
/// connection would otherwise hash to two unrelated map entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ConnectionKey {
    low: (Ipv4Address, u16),
    high: (Ipv4Address, u16),
}

impl ConnectionKey {
    /// Returns the connection key plus whether `five_tuple`'s own direction
    /// is the "low-to-high" half, so FIN state can be attributed to the
    /// right side regardless of which direction's segment arrives first.
    fn from_five_tuple(five_tuple: &FiveTuple) -> (Self, bool) {
        let src = (five_tuple.src_ip, five_tuple.src_port);
        let dst = (five_tuple.dst_ip, five_tuple.dst_port);
        if src <= dst {
            (Self { low: src, high: dst }, true)
        } else {
            (Self { low: dst, high: src }, false)
        }
    }
}

/// Per-connection FIN bookkeeping, shared across the two directional
/// `TcpStream` entries that make up one connection. A connection is only
/// complete once both sides have FIN'd; one side's teardown must not touch
/// the peer direction's still-open reassembly state.
#[derive(Debug, Default)]
struct ConnectionFin {
    fwd_done: bool,
    rev_done: bool,
}

impl ConnectionFin {
    fn both_done(&self) -> bool {
        self.fwd_done && self.rev_done
    }
}

fn reversed(five_tuple: &FiveTuple) -> FiveTuple {
    FiveTuple {
        src_ip: five_tuple.dst_ip,
        dst_ip: five_tuple.src_ip,
        src_port: five_tuple.dst_port,
        dst_port: five_tuple.src_port,
        l4_protocol: five_tuple.l4_protocol,
    }
}

/// Outcome of ingesting one TCP segment: the application messages produced
/// and how many message windows were discarded to a parser error.
#[derive(Debug, Default)]
pub struct TcpIngestOutcome {
    pub messages: Vec<OutputPacket>,
    pub parse_errors: usize,
    /// The stream's sequence tracking was reset because this segment landed
    /// in a gap that will now never close (e.g. a retransmit storm or a
    /// capture drop) — counted by the caller as a stream reset, not fatal.
    pub stream_finished: bool,
}

/// Per-partition TCP reassembler. Not `Send`/shared: one instance per
/// partition, matching the IPv4 reassembler's concurrency model.
pub struct TcpReassembler {
    config: TcpConfig,
    streams: FxHashMap<FiveTuple, TcpStream>,
    connections: FxHashMap<ConnectionKey, ConnectionFin>,
    parser_tags: Vec<String>,
}

impl TcpReassembler {
    pub fn new(config: TcpConfig, parser_tags: Vec<String>) -> Self {
        Self {
            config,
            streams: FxHashMap::default(),
            connections: FxHashMap::default(),
            parser_tags,
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    pub fn ingest(
        &mut self,
        five_tuple: FiveTuple,
        header: &TcpHeader,
        payload: &[u8],
        timestamp_ns: i64,
        now: Instant,
    ) -> TcpIngestOutcome {
        let parser_tags = &self.parser_tags;
        let stream = self
            .streams
            .entry(five_tuple)
            .or_insert_with(|| TcpStream::new(ParserComposite::from_tags(parser_tags), now));
        stream.last_activity = now;

        let mut outcome = TcpIngestOutcome::default();

        let is_fin = header.flags.fin();
        let data_end = header.sequence.wrapping_add(payload.len() as u32);
        if is_fin {
            stream.fin_seq = Some(data_end);
        }

        if !payload.is_empty() {
            place_segment(stream, header.sequence, payload.to_vec());
            drain_contiguous(stream);
            outcome.parse_errors += drain_messages(stream, five_tuple, timestamp_ns, &mut outcome.messages);
        }

        if let (Some(next_seq), Some(fin_seq)) = (stream.next_seq, stream.fin_seq) {
            if mod_geq(next_seq, fin_seq) {
                stream.closed = true;
            }
        } else if is_fin && stream.next_seq.is_none() {
            stream.closed = true;
        }

        if stream.closed {
            let (key, is_forward) = ConnectionKey::from_five_tuple(&five_tuple);
            let both_done = {
                let fin_state = self.connections.entry(key).or_default();
                if is_forward {
                    fin_state.fwd_done = true;
                } else {
                    fin_state.rev_done = true;
                }
                fin_state.both_done()
            };

            if both_done {
                self.connections.remove(&key);
                let peer = reversed(&five_tuple);
                if matches!(self.streams.get(&five_tuple), Some(s) if s.is_drained_and_closed()) {
                    self.streams.remove(&five_tuple);
                    outcome.stream_finished = true;
                }
                if matches!(self.streams.get(&peer), Some(s) if s.is_drained_and_closed()) {
                    self.streams.remove(&peer);
                    outcome.stream_finished = true;
                }
            }
        }

        outcome
    }

    /// Idle-timeout sweep: flushes whatever is buffered for streams that
    /// have gone quiet past `idle_ttl` and drops their state. Returns the
    /// emitted messages and the number of streams evicted.
    pub fn sweep(&mut self, now: Instant) -> (Vec<OutputPacket>, usize) {
        let idle_ttl = self.config.idle_ttl;
        let stale: Vec<FiveTuple> = self
            .streams
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_activity) > idle_ttl)
            .map(|(k, _)| *k)
            .collect();

        let mut messages = Vec::new();
        let timestamp_ns = wall_clock_ns();
        for five_tuple in &stale {
            if let Some(mut stream) = self.streams.remove(five_tuple) {
                final_flush(&mut stream, *five_tuple, timestamp_ns, &mut messages);
            }
            let (key, _) = ConnectionKey::from_five_tuple(five_tuple);
            if !self.streams.contains_key(&reversed(five_tuple)) {
                self.connections.remove(&key);
            }
        }
        (messages, stale.len())
    }
}

/// Inserts a segment into the pending list (sorted by sequence number) or,
/// if it lands exactly at the front of the gap, directly advances the
/// contiguous buffer. Overlapping retransmits are trimmed to their new
/// bytes only; pure retransmits (fully behind `next_seq`) are dropped.
fn place_segment(stream: &mut TcpStream, seq: u32, payload: Vec<u8>) {
    let Some(next_seq) = stream.next_seq else {
        stream.next_seq = Some(seq);
        stream.pending.push(PendingSegment { seq, payload });
        sort_pending(stream);
        return;
    };

    let end = seq.wrapping_add(payload.len() as u32);
    if mod_le(end, next_seq) || end == next_seq {
        // Entirely old data already delivered; a pure retransmit.
        return;
    }
    let (seq, payload) = if mod_ge(next_seq, seq) {
        // Partial overlap: keep only the bytes at or after next_seq.
        let skip = next_seq.wrapping_sub(seq) as usize;
        (next_seq, payload[skip.min(payload.len())..].to_vec())
    } else {
        (seq, payload)
    };
    if payload.is_empty() {
        return;
    }
    if stream.pending.iter().any(|p| p.seq == seq) {
        return;
    }
    stream.pending.push(PendingSegment { seq, payload });
    sort_pending(stream);
}

fn sort_pending(stream: &mut TcpStream) {
    stream.pending.sort_by(|a, b| {
        if a.seq == b.seq {
            std::cmp::Ordering::Equal
        } else if mod_le(a.seq, b.seq) {
            std::cmp::Ordering::Less
        } else {
            std::cmp::Ordering::Greater
        }
    });
}

/// Moves every pending segment that has become contiguous with `next_seq`
/// into the stream's byte buffer, in order.
fn drain_contiguous(stream: &mut TcpStream) {
    loop {
        let Some(next_seq) = stream.next_seq else { break };
        let Some(pos) = stream.pending.iter().position(|p| p.seq == next_seq) else {
            break;
        };
        let segment = stream.pending.remove(pos);
        let advanced = next_seq.wrapping_add(segment.payload.len() as u32);
        stream.buffer.concatenate(Message::new(segment.payload));
        stream.next_seq = Some(advanced);
    }
}

fn drain_messages(
    stream: &mut TcpStream,
    five_tuple: FiveTuple,
    timestamp_ns: i64,
    out: &mut Vec<OutputPacket>,
) -> usize {
    let mut parse_errors = 0;
    loop {
        let bytes = stream.buffer.to_vec();
        if bytes.is_empty() || !stream.composite.detect(&bytes) {
            break;
        }
        match stream.composite.extract(&bytes) {
            Ok(Some(extracted)) if extracted.consumed > 0 => {
                out.push(OutputPacket {
                    timestamp_ns,
                    five_tuple,
                    l4_protocol: L4Protocol::Tcp,
                    application_protocol_tag: extracted.application_protocol_tag,
                    payload: extracted.payload,
                    raw_frame: None,
                });
                stream.buffer.remove_front(extracted.consumed);
            }
            Ok(_) => break,
            Err(_) => {
                parse_errors += 1;
                stream.composite.reset_all();
                stream.buffer.remove_front(bytes.len());
                break;
            }
        }
    }
    parse_errors
}

fn final_flush(stream: &mut TcpStream, five_tuple: FiveTuple, timestamp_ns: i64, out: &mut Vec<OutputPacket>) {
    drain_contiguous(stream);
    drain_messages(stream, five_tuple, timestamp_ns, out);
}

fn wall_clock_ns() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserConfig;
    use crate::decode::tcp_header::{TcpFlags, TcpHeader};
    use crate::ipv4::Ipv4Address;

    fn tuple() -> FiveTuple {
        FiveTuple {
            src_ip: Ipv4Address::new([10, 0, 0, 1]),
            dst_ip: Ipv4Address::new([10, 0, 0, 2]),
            src_port: 5060,
            dst_port: 5060,
            l4_protocol: L4Protocol::Tcp,
        }
    }

    const FIN: u8 = 0b0000_0001;

    fn segment(seq: u32, flag_bits: u8) -> TcpHeader {
        TcpHeader {
            source: 5060,
            destination: 5060,
            sequence: seq,
            acknowledgement: 0,
            flags: TcpFlags::from(flag_bits),
            data_offset_bytes: 20,
        }
    }

    fn reassembler() -> TcpReassembler {
        TcpReassembler::new(TcpConfig::default(), ParserConfig::minimal_voip().enabled_tags)
    }

    #[test]
    fn in_order_segments_assemble_one_message() {
        let mut r = reassembler();
        let now = Instant::now();
        let part_a = b"INVITE sip:bob SIP/2.0\r\nContent-Length: 4\r\n\r\n";
        let part_b = b"ping";
        let h1 = segment(1000, 0);
        let out1 = r.ingest(tuple(), &h1, part_a, 1, now);
        assert!(out1.messages.is_empty());
        let h2 = segment(1000 + part_a.len() as u32, 0);
        let out2 = r.ingest(tuple(), &h2, part_b, 2, now);
        assert_eq!(out2.messages.len(), 1);
        assert_eq!(out2.messages[0].application_protocol_tag, "SIP");
    }

    #[test]
    fn out_of_order_segments_hold_until_gap_closes() {
        // A three-segment SIP/TCP stream where the second and third segments
        // (both continuations of one stream whose start already arrived)
        // are delivered in reverse order.
        let mut r = reassembler();
        let now = Instant::now();
        let header_part = b"INVITE sip:bob SIP/2.0\r\nContent-Length: 8\r\n\r\n";
        let body_first_half = b"ping";
        let body_second_half = b"pong";

        let h1 = segment(1000, 0);
        let out1 = r.ingest(tuple(), &h1, header_part, 1, now);
        assert!(out1.messages.is_empty());

        let h3 = segment(1000 + header_part.len() as u32 + body_first_half.len() as u32, 0);
        let out_late = r.ingest(tuple(), &h3, body_second_half, 2, now);
        assert!(out_late.messages.is_empty());
        assert_eq!(r.stream_count(), 1);

        let h2 = segment(1000 + header_part.len() as u32, 0);
        let out_early = r.ingest(tuple(), &h2, body_first_half, 3, now);
        assert_eq!(out_early.messages.len(), 1);
        assert!(out_early.messages[0].payload.ends_with(b"pingpong"));
    }

    #[test]
    fn duplicate_retransmit_is_dropped() {
        let mut r = reassembler();
        let now = Instant::now();
        let part_a = b"INVITE sip:bob SIP/2.0\r\nContent-Length: 0\r\n\r\n";
        let h1 = segment(1000, 0);
        r.ingest(tuple(), &h1, part_a, 1, now);
        let out_retransmit = r.ingest(tuple(), &h1, part_a, 2, now);
        assert!(out_retransmit.messages.is_empty());
    }

    fn reverse_tuple() -> FiveTuple {
        let fwd = tuple();
        FiveTuple {
            src_ip: fwd.dst_ip,
            dst_ip: fwd.src_ip,
            src_port: fwd.dst_port,
            dst_port: fwd.src_port,
            l4_protocol: fwd.l4_protocol,
        }
    }

    #[test]
    fn fin_on_one_side_does_not_close_the_peer_direction() {
        // A half-duplex teardown: this direction FINs with a drained
        // buffer, but the peer direction has never sent anything. The
        // stream must stay alive so a later segment on the reverse tuple
        // still reassembles against real state, not a fresh one.
        let mut r = reassembler();
        let now = Instant::now();
        let body = b"OPTIONS sip:bob SIP/2.0\r\nContent-Length: 0\r\n\r\n";
        let h1 = segment(1000, 0);
        r.ingest(tuple(), &h1, body, 1, now);
        let h2 = segment(1000 + body.len() as u32, FIN);
        let out = r.ingest(tuple(), &h2, &[], 2, now);
        assert!(!out.stream_finished);
        assert_eq!(r.stream_count(), 1);
    }

    #[test]
    fn fin_on_both_directions_closes_and_removes_the_pair() {
        let mut r = reassembler();
        let now = Instant::now();
        let fwd_body = b"OPTIONS sip:bob SIP/2.0\r\nContent-Length: 0\r\n\r\n";
        let rev_body = b"SIP/2.0 200 OK\r\nContent-Length: 0\r\n\r\n";

        let h1 = segment(1000, 0);
        r.ingest(tuple(), &h1, fwd_body, 1, now);
        let h_fwd_fin = segment(1000 + fwd_body.len() as u32, FIN);
        let out_fwd = r.ingest(tuple(), &h_fwd_fin, &[], 2, now);
        assert!(!out_fwd.stream_finished);
        assert_eq!(r.stream_count(), 1);

        let h2 = segment(2000, 0);
        r.ingest(reverse_tuple(), &h2, rev_body, 3, now);
        let h_rev_fin = segment(2000 + rev_body.len() as u32, FIN);
        let out_rev = r.ingest(reverse_tuple(), &h_rev_fin, &[], 4, now);
        assert!(out_rev.stream_finished);
        assert_eq!(r.stream_count(), 0);
    }

    #[test]
    fn idle_sweep_flushes_and_evicts() {
        let mut r = TcpReassembler::new(
            TcpConfig { idle_ttl: Duration::from_millis(1) },
            ParserConfig::minimal_voip().enabled_tags,
        );
        let now = Instant::now();
        let body = b"INVITE sip:bob SIP/2.0\r\nContent-Length: 0\r\n\r\n";
        let h1 = segment(1000, 0);
        r.ingest(tuple(), &h1, body, 1, now);
        assert_eq!(r.stream_count(), 1);
        let (messages, evicted) = r.sweep(now + Duration::from_millis(5));
        assert_eq!(evicted, 1);
        assert!(messages.is_empty(), "message already drained before sweep");
        assert_eq!(r.stream_count(), 0);
    }
}
