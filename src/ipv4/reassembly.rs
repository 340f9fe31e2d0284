//! Per-flow IPv4 fragment reassembly.
//!
//! The occupancy structure is a fragment list kept sorted by offset with a
//! linear contiguity walk on completion, not the bitmap-plus-heap scheme
//! that earlier prototypes of this kind of reassembler often reach for: a
//! sorted list tolerates overlap-free out-of-order arrival just as well and
//! keeps the per-buffer memory bound obvious (one `Vec` entry per fragment,
//! nothing sized up front).

use super::{ControlFlags, Ipv4Datagram, Ipv4FlowKey, Ipv4Header, NetworkFlow};
use rustc_hash::FxHashMap;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy)]
pub struct ReassemblyConfig {
    pub fragment_timeout: Duration,
    pub max_fragments: usize,
    pub max_ip_size: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            fragment_timeout: Duration::from_secs(30),
            max_fragments: 100,
            max_ip_size: 65535,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Fragment {
    byte_offset: usize,
    payload: Vec<u8>,
}

struct FragmentBuffer {
    fragments: Vec<Fragment>,
    received_bytes: usize,
    total_size: Option<usize>,
    has_last: bool,
    first_seen: Instant,
    last_activity: Instant,
    template_header: Ipv4Header,
}

impl FragmentBuffer {
    fn new(template_header: Ipv4Header, now: Instant) -> Self {
        Self {
            fragments: Vec::new(),
            received_bytes: 0,
            total_size: None,
            has_last: false,
            first_seen: now,
            last_activity: now,
            template_header,
        }
    }

    /// Inserts a fragment in offset-sorted order. Returns `false` if a
    /// fragment already occupies this offset (the new one is dropped).
    fn insert(&mut self, byte_offset: usize, payload: Vec<u8>) -> bool {
        match self
            .fragments
            .binary_search_by_key(&byte_offset, |f| f.byte_offset)
        {
            Ok(_) => false,
            Err(index) => {
                self.received_bytes += payload.len();
                self.fragments.insert(index, Fragment { byte_offset, payload });
                true
            }
        }
    }

    /// Walks the sorted fragments from offset 0 and reports whether they
    /// form one contiguous run up to `total_size`.
    fn is_complete(&self) -> bool {
        let Some(total_size) = self.total_size else {
            return false;
        };
        if !self.has_last {
            return false;
        }
        let mut expected = 0usize;
        for fragment in &self.fragments {
            if fragment.byte_offset != expected {
                return false;
            }
            expected += fragment.payload.len();
        }
        expected == total_size
    }

    fn concatenated_payload(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_size.unwrap_or(self.received_bytes));
        for fragment in &self.fragments {
            out.extend_from_slice(&fragment.payload);
        }
        out
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyError {
    #[error("a fragment already occupies this offset")]
    DuplicateFragment,
    #[error("fragment offset and length exceed the maximum IPv4 datagram size")]
    FragmentOverflow,
    #[error("flow exceeded the maximum number of outstanding fragments")]
    TooManyFragments,
    #[error("reassembled datagram would exceed the maximum IPv4 datagram size")]
    OversizeReassembly,
    #[error("fragment buffer evicted after exceeding the reassembly timeout")]
    ReassemblyTimeout,
}

/// Per-partition IPv4 fragment reassembler. Not `Send`/shared: one instance
/// per partition, used single-threaded from that partition's reader loop.
pub struct Ipv4Reassembler {
    config: ReassemblyConfig,
    buffers: FxHashMap<Ipv4FlowKey, FragmentBuffer>,
}

impl Ipv4Reassembler {
    pub fn new(config: ReassemblyConfig) -> Self {
        Self {
            config,
            buffers: FxHashMap::default(),
        }
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// `DF=1 ∨ (MF=0 ∧ frag_offset=0)`.
    pub fn is_unfragmented(header: &Ipv4Header) -> bool {
        header.flags.dont_fragment() || (!header.flags.more_fragments() && header.fragment_offset == 0)
    }

    /// Ingests one IPv4 frame. Unfragmented datagrams pass through
    /// immediately; fragments are buffered until the flow's coverage is
    /// complete.
    pub fn ingest(
        &mut self,
        header: Ipv4Header,
        payload: &[u8],
        timestamp_ns: i64,
        now: Instant,
    ) -> Result<Option<Ipv4Datagram>, ReassemblyError> {
        if Self::is_unfragmented(&header) {
            return Ok(Some(to_datagram(&header, payload.to_vec(), timestamp_ns)));
        }

        if payload.is_empty() {
            return Err(ReassemblyError::FragmentOverflow);
        }
        let byte_offset = header.fragment_offset as usize * 8;
        if byte_offset + payload.len() > 65535 {
            return Err(ReassemblyError::FragmentOverflow);
        }

        self.sweep_one(now);

        let flow_key = Ipv4FlowKey {
            network_flow: NetworkFlow::new(header.source, header.destination),
            identification: header.identification,
        };

        let buffer = self
            .buffers
            .entry(flow_key)
            .or_insert_with(|| FragmentBuffer::new(header, now));

        if buffer.fragments.len() >= self.config.max_fragments {
            self.buffers.remove(&flow_key);
            return Err(ReassemblyError::TooManyFragments);
        }

        if !buffer.insert(byte_offset, payload.to_vec()) {
            return Err(ReassemblyError::DuplicateFragment);
        }
        buffer.last_activity = now;

        if !header.flags.more_fragments() {
            buffer.has_last = true;
            buffer.total_size = Some(byte_offset + payload.len());
        }

        if !buffer.is_complete() {
            return Ok(None);
        }

        let buffer = self.buffers.remove(&flow_key).expect("just inserted");
        let total_size = buffer.total_size.expect("complete implies total_size set");
        if total_size > self.config.max_ip_size {
            return Err(ReassemblyError::OversizeReassembly);
        }

        let payload = buffer.concatenated_payload();
        let mut template = buffer.template_header;
        template.flags.set_more_fragments(false);
        template.fragment_offset = 0;
        template.total_length = (template.header_len() + total_size) as u16;

        Ok(Some(to_datagram(&template, payload, timestamp_ns)))
    }

    /// Removes any single timed-out buffer touched by the current ingest
    /// path. Cheap enough to run on every fragment; bounds per-flow memory
    /// without waiting for the periodic sweep.
    fn sweep_one(&mut self, now: Instant) {
        self.buffers
            .retain(|_, buffer| now.duration_since(buffer.first_seen) <= self.config.fragment_timeout);
    }

    /// The periodic eviction sweep (~10s per the default), run from the
    /// partition's own ticker so no locking is needed. Returns the number of
    /// buffers evicted, which the caller bumps `fragments_timed_out` by.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.buffers.len();
        self.buffers
            .retain(|_, buffer| now.duration_since(buffer.first_seen) <= self.config.fragment_timeout);
        before - self.buffers.len()
    }
}

fn to_datagram(header: &Ipv4Header, payload: Vec<u8>, timestamp_ns: i64) -> Ipv4Datagram {
    Ipv4Datagram {
        src_ip: header.source,
        dst_ip: header.destination,
        protocol: header.protocol,
        id: header.identification,
        flags: header.flags,
        ttl: header.time_to_live,
        total_length: header.total_length,
        payload,
        timestamp_ns,
        network_flow: NetworkFlow::new(header.source, header.destination),
    }
}
