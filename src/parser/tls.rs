//! TLS detection from the record header: a recognized content type and a
//! 0x03 major version byte (SSLv3 through TLS 1.3 all keep this). Detection-only.

use super::{whole_buffer, ExtractedMessage, Parser, ParserError};

const MIN_HEADER_LEN: usize = 5;
const CONTENT_TYPES: &[u8] = &[20, 21, 22, 23];

pub struct TlsParser;

impl TlsParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for TlsParser {
    fn tag(&self) -> &'static str {
        "TLS"
    }

    fn detect(&self, bytes: &[u8]) -> bool {
        bytes.len() >= MIN_HEADER_LEN
            && CONTENT_TYPES.contains(&bytes[0])
            && bytes[1] == 3
    }

    fn extract(&mut self, bytes: &[u8]) -> Result<Option<ExtractedMessage>, ParserError> {
        Ok(whole_buffer(bytes, "TLS"))
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_handshake_record() {
        let record = [22, 3, 3, 0, 10, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        assert!(TlsParser::new().detect(&record));
    }

    #[test]
    fn rejects_wrong_major_version() {
        let record = [22, 2, 0, 0, 10];
        assert!(!TlsParser::new().detect(&record));
    }
}
