//! A partition: one capture handle, one reader task, and
//! the decode/reassemble/dispatch/parse chain that turns its frames into
//! `OutputPacket`s. A pipeline runs one or more partitions sharing a fanout
//! group, each single-threaded over its own flow state.

use crate::capture::{CaptureError, CaptureHandle, CaptureOptions, FanoutMode, ReadOutcome};
use crate::config::CodecConfig;
use crate::decode::{DecodedLayers, LayerParser};
use crate::dispatch::{self, Dispatched};
use crate::ipv4::reassembly::{Ipv4Reassembler, ReassemblyConfig};
use crate::output::OutputPacket;
use crate::parser::ParserComposite;
use crate::tcp::{TcpConfig, TcpReassembler};
use crate::telemetry::Counters;
use crate::udp;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub struct PartitionConfig {
    pub id: usize,
    pub capture: CaptureOptions,
    pub codec: CodecConfig,
    pub parser_tags: Vec<String>,
}

/// Opens the partition's capture handle and runs its reader loop until
/// `cancel` fires or the handle reports a fatal error.
pub async fn run(
    config: PartitionConfig,
    output: mpsc::Sender<OutputPacket>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) -> Result<(), CaptureError> {
    let fanout_group_id = config.capture.fanout_group_id;
    let bpf_filter = config.capture.bpf_filter.clone();
    let mut handle = crate::capture::open(config.capture)?;
    if let Some(group_id) = fanout_group_id {
        handle.set_fanout(group_id, FanoutMode::HashWithDefrag)?;
    }
    if let Some(program) = bpf_filter {
        handle.set_bpf(&program)?;
    }
    run_with_handle(
        config.id,
        handle,
        config.codec,
        config.parser_tags,
        output,
        counters,
        cancel,
    )
    .await;
    Ok(())
}

struct PartitionState {
    id: usize,
    layer_parser: LayerParser,
    layers: DecodedLayers,
    ipv4_reassembler: Ipv4Reassembler,
    tcp_reassembler: TcpReassembler,
    udp_composite: ParserComposite,
    output: mpsc::Sender<OutputPacket>,
    counters: Arc<Counters>,
}

async fn run_with_handle(
    id: usize,
    mut handle: Box<dyn CaptureHandle>,
    codec: CodecConfig,
    parser_tags: Vec<String>,
    output: mpsc::Sender<OutputPacket>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    let mut state = PartitionState {
        id,
        layer_parser: LayerParser::new(),
        layers: DecodedLayers::new(),
        ipv4_reassembler: Ipv4Reassembler::new(ReassemblyConfig {
            fragment_timeout: codec.fragment_timeout(),
            max_fragments: codec.max_fragments,
            max_ip_size: codec.max_ip_size,
        }),
        tcp_reassembler: TcpReassembler::new(
            TcpConfig { idle_ttl: codec.tcp_idle_ttl() },
            parser_tags.clone(),
        ),
        udp_composite: ParserComposite::from_tags(&parser_tags),
        output,
        counters,
    };

    let mut last_sweep = Instant::now();

    loop {
        let mut task = tokio::task::spawn_blocking(move || {
            let result = handle.read_frame();
            (handle, result)
        });

        let joined = tokio::select! {
            _ = cancel.cancelled() => {
                task.abort();
                break;
            }
            joined = &mut task => joined,
        };

        match joined {
            Ok((returned_handle, Ok(ReadOutcome::Frame(frame)))) => {
                handle = returned_handle;
                process_frame(&mut state, &frame.data, frame.capture_info.timestamp_ns);
            }
            Ok((returned_handle, Ok(ReadOutcome::Timeout))) => {
                handle = returned_handle;
            }
            Ok((returned_handle, Err(e))) => {
                handle = returned_handle;
                tracing::warn!(partition = state.id, error = %e, "capture read failed, stopping partition");
                Counters::incr(&state.counters.partition_fatal);
                break;
            }
            Err(_) => break,
        }

        let now = Instant::now();
        if now.duration_since(last_sweep) >= SWEEP_INTERVAL {
            sweep(&mut state, now);
            last_sweep = now;
        }
    }
}

fn process_frame(state: &mut PartitionState, data: &[u8], timestamp_ns: i64) {
    Counters::incr(&state.counters.frames_in);

    if let Err(e) = state.layer_parser.decode(data, &mut state.layers) {
        tracing::debug!(partition = state.id, error = %e, "frame decode failed");
        return;
    }
    let Some(header) = state.layers.ipv4 else {
        return;
    };
    Counters::incr(&state.counters.frames_decoded);

    let payload = &data[state.layers.ipv4_payload_offset..][..state.layers.ipv4_payload_len];
    let is_fragment = !Ipv4Reassembler::is_unfragmented(&header);
    if is_fragment {
        Counters::incr(&state.counters.fragments_in);
    }

    let datagram = match state.ipv4_reassembler.ingest(header, payload, timestamp_ns, Instant::now()) {
        Ok(Some(datagram)) => {
            if is_fragment {
                Counters::incr(&state.counters.fragments_reassembled);
            }
            datagram
        }
        Ok(None) => return,
        Err(e) => {
            tracing::debug!(partition = state.id, error = %e, "fragment reassembly failed");
            return;
        }
    };

    let dispatched = match dispatch::dispatch(&datagram) {
        Ok(d) => d,
        Err(e) => {
            tracing::debug!(partition = state.id, error = %e, "transport dispatch failed");
            return;
        }
    };

    let messages = match dispatched {
        Dispatched::Udp { five_tuple, payload } => {
            udp::frame(five_tuple, timestamp_ns, payload, &mut state.udp_composite)
        }
        Dispatched::Tcp { five_tuple, header, payload } => {
            let outcome = state
                .tcp_reassembler
                .ingest(five_tuple, &header, payload, timestamp_ns, Instant::now());
            Counters::add(&state.counters.tcp_parser_errors, outcome.parse_errors as u64);
            state
                .counters
                .tcp_streams_active
                .store(state.tcp_reassembler.stream_count() as u64, std::sync::atomic::Ordering::Relaxed);
            outcome.messages
        }
    };

    emit(state, messages);
}

fn sweep(state: &mut PartitionState, now: Instant) {
    let timed_out = state.ipv4_reassembler.sweep(now);
    if timed_out > 0 {
        Counters::add(&state.counters.fragments_timed_out, timed_out as u64);
        tracing::debug!(partition = state.id, count = timed_out, "evicted timed-out fragment buffers");
    }

    let (flushed, evicted) = state.tcp_reassembler.sweep(now);
    if evicted > 0 {
        tracing::debug!(partition = state.id, count = evicted, "evicted idle TCP streams");
        state
            .counters
            .tcp_streams_active
            .store(state.tcp_reassembler.stream_count() as u64, std::sync::atomic::Ordering::Relaxed);
    }
    emit(state, flushed);
}

fn emit(state: &mut PartitionState, messages: Vec<OutputPacket>) {
    for message in messages {
        match state.output.try_send(message) {
            Ok(()) => Counters::incr(&state.counters.records_emitted),
            Err(_) => Counters::incr(&state.counters.records_dropped_full_channel),
        }
    }
}
