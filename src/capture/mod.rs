//! Kernel packet sources.

pub mod afpacket_handle;

use std::time::Duration;
use thiserror::Error;

/// Timestamp and length metadata captured alongside the raw frame bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    pub timestamp_ns: i64,
    pub caplen: u32,
    pub wirelen: u32,
}

/// Raw link-layer bytes plus capture metadata. Ephemeral: owned by the
/// partition loop for one decode cycle.
#[derive(Debug, Clone)]
pub struct FrameRecord {
    pub data: Vec<u8>,
    pub capture_info: CaptureInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureType {
    Afpacket,
    Pcap,
    Xdp,
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub interface: String,
    pub snaplen: u32,
    pub buffer_size_bytes: u32,
    pub poll_timeout: Duration,
    pub bpf_filter: Option<Vec<u8>>,
    pub fanout_group_id: Option<u16>,
    pub capture_type: CaptureType,
}

/// Fanout distributes frames matching a 5-tuple hash across a group of
/// sockets while keeping per-flow affinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutMode {
    HashWithDefrag,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture type is not supported by this build")]
    UnsupportedType,
    #[error("ring buffer geometry is invalid: {0}")]
    InvalidGeometry(&'static str),
    #[error("failed to open interface {interface}: {source}")]
    OpenFailed {
        interface: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to install BPF filter: {0}")]
    BpfInstallFailed(std::io::Error),
    #[error("failed to join fanout group: {0}")]
    FanoutFailed(std::io::Error),
    #[error("read failed: {0}")]
    ReadFailed(std::io::Error),
}

/// One frame, or the "nothing happened within the poll timeout" outcome
/// which the partition loop treats as "try again", never as an error.
pub enum ReadOutcome {
    Frame(FrameRecord),
    Timeout,
}

/// A kernel packet source, thread-affine to its owning partition.
pub trait CaptureHandle: Send {
    /// Must be called after open, before the first read. All handles sharing
    /// a group must specify the identical mode.
    fn set_fanout(&mut self, group_id: u16, mode: FanoutMode) -> Result<(), CaptureError>;

    /// Accepts a compiled BPF program; compiling it is an external concern.
    fn set_bpf(&mut self, compiled_program: &[u8]) -> Result<(), CaptureError>;

    /// Blocks up to the handle's poll timeout.
    fn read_frame(&mut self) -> Result<ReadOutcome, CaptureError>;

    /// Idempotent.
    fn close(&mut self);
}

/// Validates AF_PACKET ring geometry: `frame_size` a multiple of 16,
/// `block_size` a multiple of both the page size and `frame_size`,
/// `num_blocks = buffer_size / block_size >= 1`.
pub fn validate_ring_geometry(
    frame_size: u32,
    block_size: u32,
    buffer_size: u32,
    page_size: u32,
) -> Result<u32, CaptureError> {
    if frame_size % 16 != 0 {
        return Err(CaptureError::InvalidGeometry(
            "frame_size must be a multiple of 16",
        ));
    }
    if block_size % page_size != 0 {
        return Err(CaptureError::InvalidGeometry(
            "block_size must be a multiple of the page size",
        ));
    }
    if block_size % frame_size != 0 {
        return Err(CaptureError::InvalidGeometry(
            "block_size must be a multiple of frame_size",
        ));
    }
    let num_blocks = buffer_size / block_size;
    if num_blocks < 1 {
        return Err(CaptureError::InvalidGeometry(
            "buffer_size must fit at least one block",
        ));
    }
    Ok(num_blocks)
}

/// Opens a capture handle of the requested type. `pcap` and `xdp` are
/// recognized but return `UnsupportedType` — nothing in this build exercises
/// them, and declaring support without a backend to match would be a lie the
/// caller would only discover at runtime anyway.
pub fn open(options: CaptureOptions) -> Result<Box<dyn CaptureHandle>, CaptureError> {
    match options.capture_type {
        CaptureType::Afpacket => Ok(Box::new(afpacket_handle::AfPacketHandle::open(options)?)),
        CaptureType::Pcap | CaptureType::Xdp => Err(CaptureError::UnsupportedType),
    }
}
