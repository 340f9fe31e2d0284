//! Owns a set of partitions, their output channel(s), and the bounded
//! graceful-shutdown join: signal every partition to stop, then wait up to
//! a configured timeout before abandoning any still running.

use crate::capture::{CaptureError, CaptureOptions, CaptureType};
use crate::config::{CodecConfig, ParserConfig, PipelineConfig, SnifferConfig};
use crate::output::OutputPacket;
use crate::partition::{self, PartitionConfig};
use crate::telemetry::Counters;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Where a pipeline's partitions send their `OutputPacket`s.
pub enum PipelineOutput {
    /// All partitions share one channel; consumers see one interleaved
    /// stream.
    Unified(mpsc::Receiver<OutputPacket>),
    /// Each partition gets its own channel, indexed by partition id.
    PerPartition(Vec<mpsc::Receiver<OutputPacket>>),
}

/// What `Pipeline::stop` observed: whether every partition joined inside
/// the configured timeout, or some were abandoned still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub partitions_total: usize,
    pub partitions_joined: usize,
    pub timed_out: bool,
}

pub struct Pipeline {
    config: PipelineConfig,
    partition_configs: Vec<PartitionConfig>,
    senders: Vec<mpsc::Sender<OutputPacket>>,
    counters: Arc<Counters>,
    cancel: CancellationToken,
    handles: Vec<JoinHandle<Result<(), CaptureError>>>,
}

impl Pipeline {
    /// Builds a pipeline's partition configs and output channel(s) without
    /// starting any reader tasks. Call `start` to begin capturing.
    pub fn init(
        pipeline: PipelineConfig,
        sniffer: SnifferConfig,
        codec: CodecConfig,
        parser: ParserConfig,
    ) -> (Self, PipelineOutput) {
        let counters = Arc::new(Counters::new());
        let partition_count = pipeline.partition_count.max(1);
        let fanout_group_id = if partition_count > 1 {
            Some(sniffer.fanout_id.unwrap_or(1))
        } else {
            sniffer.fanout_id
        };

        let mut partition_configs = Vec::with_capacity(partition_count);
        let mut senders = Vec::with_capacity(partition_count);
        let output = if pipeline.unified_output {
            let (tx, rx) = mpsc::channel(pipeline.output_channel_capacity);
            for id in 0..partition_count {
                senders.push(tx.clone());
                partition_configs.push(partition_config(id, &sniffer, &codec, &parser, fanout_group_id));
            }
            PipelineOutput::Unified(rx)
        } else {
            let mut receivers = Vec::with_capacity(partition_count);
            for id in 0..partition_count {
                let (tx, rx) = mpsc::channel(pipeline.output_channel_capacity);
                senders.push(tx);
                receivers.push(rx);
                partition_configs.push(partition_config(id, &sniffer, &codec, &parser, fanout_group_id));
            }
            PipelineOutput::PerPartition(receivers)
        };

        (
            Self {
                config: pipeline,
                partition_configs,
                senders,
                counters,
                cancel: CancellationToken::new(),
                handles: Vec::new(),
            },
            output,
        )
    }

    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }

    /// Spawns one reader task per partition. Call once; calling again after
    /// `stop` would reuse a cancelled token, which is not supported.
    pub fn start(&mut self) {
        for (config, sender) in self.partition_configs.drain(..).zip(self.senders.drain(..)) {
            let counters = self.counters.clone();
            let cancel = self.cancel.clone();
            self.handles.push(tokio::spawn(partition::run(config, sender, counters, cancel)));
        }
    }

    /// Signals every partition to stop and waits up to the configured
    /// shutdown timeout for them to join. Partitions still running past the
    /// timeout are abandoned rather than blocked on further, favoring
    /// returning control to the caller over waiting forever on a stuck
    /// capture read.
    pub async fn stop(self) -> ShutdownReport {
        self.cancel.cancel();
        let total = self.handles.len();
        let timeout = self.config.shutdown_timeout();

        match tokio::time::timeout(timeout, futures::future::join_all(self.handles)).await {
            Ok(results) => ShutdownReport {
                partitions_total: total,
                partitions_joined: results.len(),
                timed_out: false,
            },
            Err(_) => ShutdownReport {
                partitions_total: total,
                partitions_joined: 0,
                timed_out: true,
            },
        }
    }
}

fn partition_config(
    id: usize,
    sniffer: &SnifferConfig,
    codec: &CodecConfig,
    parser: &ParserConfig,
    fanout_group_id: Option<u16>,
) -> PartitionConfig {
    PartitionConfig {
        id,
        capture: CaptureOptions {
            interface: sniffer.network_interface.clone(),
            snaplen: sniffer.snap_len,
            buffer_size_bytes: sniffer.buffer_size,
            poll_timeout: Duration::from_millis(sniffer.poll_timeout_ms),
            bpf_filter: sniffer.bpf_filter.clone(),
            fanout_group_id,
            capture_type: match sniffer.capture_type {
                crate::config::CaptureType::Afpacket => CaptureType::Afpacket,
                crate::config::CaptureType::Pcap => CaptureType::Pcap,
                crate::config::CaptureType::Xdp => CaptureType::Xdp,
            },
        },
        codec: codec.clone(),
        parser_tags: parser.enabled_tags.clone(),
    }
}
