//! The closed value the core emits. Deliberately not a mutable key-value
//! interchange: enrichment belongs to whatever consumes this channel, not to
//! the capture core.

use crate::transport::{FiveTuple, L4Protocol};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPacket {
    pub timestamp_ns: i64,
    pub five_tuple: FiveTuple,
    pub l4_protocol: L4Protocol,
    pub application_protocol_tag: &'static str,
    pub payload: Vec<u8>,
    pub raw_frame: Option<Vec<u8>>,
}
