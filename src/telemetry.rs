//! Counters the embedding process can snapshot for a metrics exporter. The
//! core never exports these itself — that's the excluded metrics-endpoint
//! collaborator's job — it only keeps them current.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counters {
    pub frames_in: AtomicU64,
    pub frames_decoded: AtomicU64,
    pub fragments_in: AtomicU64,
    pub fragments_reassembled: AtomicU64,
    pub fragments_timed_out: AtomicU64,
    pub tcp_streams_active: AtomicU64,
    pub tcp_parser_errors: AtomicU64,
    pub records_emitted: AtomicU64,
    pub records_dropped_full_channel: AtomicU64,
    pub partition_fatal: AtomicU64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_decoded: self.frames_decoded.load(Ordering::Relaxed),
            fragments_in: self.fragments_in.load(Ordering::Relaxed),
            fragments_reassembled: self.fragments_reassembled.load(Ordering::Relaxed),
            fragments_timed_out: self.fragments_timed_out.load(Ordering::Relaxed),
            tcp_streams_active: self.tcp_streams_active.load(Ordering::Relaxed),
            tcp_parser_errors: self.tcp_parser_errors.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            records_dropped_full_channel: self.records_dropped_full_channel.load(Ordering::Relaxed),
            partition_fatal: self.partition_fatal.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountersSnapshot {
    pub frames_in: u64,
    pub frames_decoded: u64,
    pub fragments_in: u64,
    pub fragments_reassembled: u64,
    pub fragments_timed_out: u64,
    pub tcp_streams_active: u64,
    pub tcp_parser_errors: u64,
    pub records_emitted: u64,
    pub records_dropped_full_channel: u64,
    pub partition_fatal: u64,
}
