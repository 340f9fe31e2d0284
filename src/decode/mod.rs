//! Zero-copy link/network header walking.
//!
//! [`LayerParser::decode`] identifies layers without allocating: the
//! Ethernet and IPv4 header fields are copied out (they're small, fixed-size
//! structs), but the IPv4 payload is referenced by offset/length into the
//! original frame buffer rather than copied. Copying only happens once a
//! datagram is known to need buffering (fragment reassembly, TCP stream
//! reassembly) — exactly the places ownership of the bytes actually
//! changes hands.

pub mod ethernet;
pub mod tcp_header;
pub mod udp_header;

use crate::ipv4::Ipv4Header;
use thiserror::Error;

pub use ethernet::EthernetHeader;

/// The layer kinds a frame can be tagged with. Reused across frames within a
/// partition; `DecodedLayers::clear` resets it at the start of each decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Ethernet,
    Ipv4,
    Ipv6,
}

/// The layers identified in one frame, plus the fixed-size header slots the
/// link/network decoders fill in. Owned by the partition, reused frame to
/// frame.
#[derive(Debug, Default)]
pub struct DecodedLayers {
    pub layers: Vec<LayerKind>,
    pub ipv4: Option<Ipv4Header>,
    pub ipv4_payload_offset: usize,
    pub ipv4_payload_len: usize,
}

impl DecodedLayers {
    pub fn new() -> Self {
        Self::default()
    }

    fn clear(&mut self) {
        self.layers.clear();
        self.ipv4 = None;
        self.ipv4_payload_offset = 0;
        self.ipv4_payload_len = 0;
    }

    pub fn has(&self, kind: LayerKind) -> bool {
        self.layers.contains(&kind)
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("ethernet: {0}")]
    Ethernet(#[from] ethernet::ParseError),
    #[error("ipv4: {0}")]
    Ipv4(#[from] crate::ipv4::ParseError),
    #[error("the IPv4 total length field claims more bytes than the frame carried")]
    Ipv4Truncated,
}

/// Decodes link/network headers into `out`. Unknown or unsupported
/// next-protocol values are left undecoded rather than failing the frame;
/// only truncated/structurally invalid headers return an error.
pub struct LayerParser;

impl LayerParser {
    pub fn new() -> Self {
        Self
    }

    #[tracing::instrument(name = "decode_frame", skip_all)]
    pub fn decode(&self, frame: &[u8], out: &mut DecodedLayers) -> Result<(), ParseError> {
        out.clear();

        let (eth, payload_offset) = match ethernet::parse(frame) {
            Ok(v) => v,
            Err(e) => return Err(e.into()),
        };
        out.layers.push(LayerKind::Ethernet);

        match eth.ethertype {
            ethernet::ETHERTYPE_IPV4 => {
                let header = Ipv4Header::from_bytes(frame[payload_offset..].iter().copied())?;
                out.layers.push(LayerKind::Ipv4);
                let header_len = header.header_len();
                let ip_start = payload_offset;
                let payload_start = ip_start + header_len;
                let declared_total = header.total_length as usize;
                if declared_total < header_len {
                    return Err(ParseError::Ipv4Truncated);
                }
                let declared_payload_len = declared_total - header_len;
                let available = frame.len().saturating_sub(payload_start);
                let payload_len = declared_payload_len.min(available);
                out.ipv4 = Some(header);
                out.ipv4_payload_offset = payload_start;
                out.ipv4_payload_len = payload_len;
            }
            ethernet::ETHERTYPE_IPV6 => {
                out.layers.push(LayerKind::Ipv6);
            }
            _ => {
                // Unsupported ethertype: stop here, this is not an error.
            }
        }

        Ok(())
    }
}

impl Default for LayerParser {
    fn default() -> Self {
        Self::new()
    }
}
