//! AF_PACKET capture backend, built on the `afpacket` crate's ring-mapped
//! socket (`afpacket::sync::RawPacketStream` implements `std::io::Read`).
//! The poll timeout is installed with `socket2`'s safe `SO_RCVTIMEO` wrapper
//! rather than a hand-rolled `setsockopt` call.

use super::{
    validate_ring_geometry, CaptureError, CaptureHandle, CaptureInfo, CaptureOptions, FanoutMode,
    FrameRecord, ReadOutcome,
};

use afpacket::sync::RawPacketStream;
use socket2::SockRef;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_FRAME_SIZE: u32 = 2048;
const DEFAULT_PAGE_SIZE: u32 = 4096;

pub struct AfPacketHandle {
    socket: RawPacketStream,
    snaplen: usize,
    closed: bool,
}

impl AfPacketHandle {
    pub fn open(options: CaptureOptions) -> Result<Self, CaptureError> {
        let block_size = DEFAULT_PAGE_SIZE.max(DEFAULT_FRAME_SIZE);
        validate_ring_geometry(
            DEFAULT_FRAME_SIZE,
            block_size,
            options.buffer_size_bytes,
            DEFAULT_PAGE_SIZE,
        )?;

        let mut socket = RawPacketStream::new().map_err(|source| CaptureError::OpenFailed {
            interface: options.interface.clone(),
            source,
        })?;
        socket
            .bind(&options.interface)
            .map_err(|source| CaptureError::OpenFailed {
                interface: options.interface.clone(),
                source,
            })?;
        let borrowed_fd = unsafe { BorrowedFd::borrow_raw(socket.as_raw_fd()) };
        SockRef::from(&borrowed_fd)
            .set_read_timeout(Some(options.poll_timeout))
            .map_err(|source| CaptureError::OpenFailed {
                interface: options.interface,
                source,
            })?;

        Ok(Self {
            socket,
            snaplen: options.snaplen as usize,
            closed: false,
        })
    }
}

impl CaptureHandle for AfPacketHandle {
    fn set_fanout(&mut self, group_id: u16, mode: FanoutMode) -> Result<(), CaptureError> {
        let FanoutMode::HashWithDefrag = mode;
        self.socket
            .set_fanout(afpacket::FanoutType::Hash, Some(group_id))
            .map_err(CaptureError::FanoutFailed)
    }

    fn set_bpf(&mut self, compiled_program: &[u8]) -> Result<(), CaptureError> {
        self.socket
            .set_bpf_filter(compiled_program)
            .map_err(CaptureError::BpfInstallFailed)
    }

    #[tracing::instrument(name = "afpacket_read_frame", skip_all)]
    fn read_frame(&mut self) -> Result<ReadOutcome, CaptureError> {
        let mut buf = vec![0u8; self.snaplen];
        match self.socket.read(&mut buf) {
            Ok(wirelen) => {
                let caplen = wirelen.min(self.snaplen);
                buf.truncate(caplen);
                Ok(ReadOutcome::Frame(FrameRecord {
                    data: buf,
                    capture_info: CaptureInfo {
                        timestamp_ns: now_ns(),
                        caplen: caplen as u32,
                        wirelen: wirelen as u32,
                    },
                }))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(ReadOutcome::Timeout)
            }
            Err(e) => Err(CaptureError::ReadFailed(e)),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

impl Drop for AfPacketHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
