//! SSH detection from the protocol version exchange banner (RFC 4253
//! §4.2: `SSH-protoversion-softwareversion`). Detection-only.

use super::{whole_buffer, ExtractedMessage, Parser, ParserError};

pub struct SshParser;

impl SshParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for SshParser {
    fn tag(&self) -> &'static str {
        "SSH"
    }

    fn detect(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(b"SSH-")
    }

    fn extract(&mut self, bytes: &[u8]) -> Result<Option<ExtractedMessage>, ParserError> {
        Ok(whole_buffer(bytes, "SSH"))
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_banner() {
        assert!(SshParser::new().detect(b"SSH-2.0-OpenSSH_9.3\r\n"));
    }

    #[test]
    fn rejects_unrelated_bytes() {
        assert!(!SshParser::new().detect(b"GET / HTTP/1.1\r\n"));
    }
}
