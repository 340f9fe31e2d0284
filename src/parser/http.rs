//! HTTP is detection-only: once a request or status line is recognized the
//! whole available buffer is handed upstream as one message.

use super::{whole_buffer, ExtractedMessage, Parser, ParserError};

const METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH", "CONNECT", "TRACE",
];

pub struct HttpParser;

impl HttpParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for HttpParser {
    fn tag(&self) -> &'static str {
        "HTTP"
    }

    fn detect(&self, bytes: &[u8]) -> bool {
        bytes.starts_with(b"HTTP/1.")
            || METHODS.iter().any(|m| {
                bytes.len() > m.len() + 1
                    && bytes[..m.len()].eq_ignore_ascii_case(m.as_bytes())
                    && bytes[m.len()] == b' '
            })
    }

    fn extract(&mut self, bytes: &[u8]) -> Result<Option<ExtractedMessage>, ParserError> {
        Ok(whole_buffer(bytes, "HTTP"))
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_get_request() {
        assert!(HttpParser::new().detect(b"GET /index.html HTTP/1.1\r\n"));
    }

    #[test]
    fn detects_status_line() {
        assert!(HttpParser::new().detect(b"HTTP/1.1 404 Not Found\r\n"));
    }

    #[test]
    fn rejects_sip() {
        assert!(!HttpParser::new().detect(b"INVITE sip:bob SIP/2.0\r\n"));
    }
}
