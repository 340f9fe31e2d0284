//! Configuration shapes consumed by the core. Loading these from a file,
//! environment variables, or a CLI is an external concern; these structs are
//! only the interchange shape plus documented defaults.

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureType {
    Afpacket,
    Pcap,
    Xdp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnifferConfig {
    pub network_interface: String,
    #[serde(default = "default_snap_len")]
    pub snap_len: u32,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: u32,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// An already-compiled classic BPF program (raw sock_filter bytecode),
    /// not a filter expression to compile — compiling `tcpdump`-style
    /// expressions is an external concern this crate does not take on.
    /// Serialized as an array of bytes, not a string.
    #[serde(default)]
    pub bpf_filter: Option<Vec<u8>>,
    #[serde(default)]
    pub fanout_id: Option<u16>,
    #[serde(default = "default_capture_type")]
    pub capture_type: CaptureType,
}

fn default_snap_len() -> u32 {
    65535
}
fn default_buffer_size() -> u32 {
    1 << 22
}
fn default_poll_timeout_ms() -> u64 {
    100
}
fn default_capture_type() -> CaptureType {
    CaptureType::Afpacket
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub fragment_timeout_secs: u64,
    pub max_fragments: usize,
    pub max_ip_size: usize,
    pub tcp_idle_ttl_secs: u64,
}

impl CodecConfig {
    pub fn fragment_timeout(&self) -> Duration {
        Duration::from_secs(self.fragment_timeout_secs)
    }

    pub fn tcp_idle_ttl(&self) -> Duration {
        Duration::from_secs(self.tcp_idle_ttl_secs)
    }
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            fragment_timeout_secs: 30,
            max_fragments: 100,
            max_ip_size: 65535,
            tcp_idle_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub name: String,
    pub partition_count: usize,
    pub unified_output: bool,
    pub output_channel_capacity: usize,
    pub shutdown_timeout_secs: u64,
}

impl PipelineConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            partition_count: 1,
            unified_output: true,
            output_channel_capacity: 20_000,
            shutdown_timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ParserConfig {
    /// Ordered list of parser tags to enable in the composite. Order is
    /// priority: earlier entries are tried first.
    pub enabled_tags: Vec<String>,
}

impl ParserConfig {
    pub fn minimal_voip() -> Self {
        Self {
            enabled_tags: vec![
                "SIP".to_owned(),
                "RTP".to_owned(),
                "RTCP".to_owned(),
            ],
        }
    }
}
