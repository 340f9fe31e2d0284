//! RTCP detection per RFC 3550's reserved payload-type range
//! (200 Sender Report .. 204 APP). Detection-only.

use super::{whole_buffer, ExtractedMessage, Parser, ParserError};

const MIN_HEADER_LEN: usize = 8;

pub struct RtcpParser;

impl RtcpParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for RtcpParser {
    fn tag(&self) -> &'static str {
        "RTCP"
    }

    fn detect(&self, bytes: &[u8]) -> bool {
        if bytes.len() < MIN_HEADER_LEN {
            return false;
        }
        let version = bytes[0] >> 6;
        let packet_type = bytes[1];
        version == 2 && (200..=204).contains(&packet_type)
    }

    fn extract(&mut self, bytes: &[u8]) -> Result<Option<ExtractedMessage>, ParserError> {
        Ok(whole_buffer(bytes, "RTCP"))
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_sender_report() {
        let packet = [0x80, 200, 0, 6, 0, 0, 0, 0];
        assert!(RtcpParser::new().detect(&packet));
    }

    #[test]
    fn rejects_out_of_range_packet_type() {
        let packet = [0x80, 96, 0, 6, 0, 0, 0, 0];
        assert!(!RtcpParser::new().detect(&packet));
    }
}
