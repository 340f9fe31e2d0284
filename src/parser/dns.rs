//! DNS detection from the fixed 12-byte header: reserved opcode bits and
//! Z bit must be sane, and at least one question is present. Detection-only.

use super::{whole_buffer, ExtractedMessage, Parser, ParserError};

const HEADER_LEN: usize = 12;

pub struct DnsParser;

impl DnsParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for DnsParser {
    fn tag(&self) -> &'static str {
        "DNS"
    }

    fn detect(&self, bytes: &[u8]) -> bool {
        if bytes.len() < HEADER_LEN {
            return false;
        }
        let flags = u16::from_be_bytes([bytes[2], bytes[3]]);
        let opcode = (flags >> 11) & 0x0f;
        let z = (flags >> 6) & 0x01;
        let qdcount = u16::from_be_bytes([bytes[4], bytes[5]]);
        opcode <= 2 && z == 0 && qdcount > 0 && qdcount < 64
    }

    fn extract(&mut self, bytes: &[u8]) -> Result<Option<ExtractedMessage>, ParserError> {
        Ok(whole_buffer(bytes, "DNS"))
    }

    fn reset(&mut self) {}
}
