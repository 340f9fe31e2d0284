//! SIP is the one application protocol this pipeline deep-parses: it needs
//! `Content-Length`-aware message boundaries so batched UDP datagrams and
//! split TCP segments both yield one `OutputPacket` per SIP message.

use super::{ExtractedMessage, Parser, ParserError};

const METHODS: &[&str] = &[
    "INVITE", "ACK", "BYE", "CANCEL", "OPTIONS", "REGISTER", "PRACK", "SUBSCRIBE", "NOTIFY",
    "PUBLISH", "INFO", "REFER", "MESSAGE", "UPDATE",
];

pub struct SipParser;

impl SipParser {
    pub fn new() -> Self {
        Self
    }
}

impl Parser for SipParser {
    fn tag(&self) -> &'static str {
        "SIP"
    }

    fn detect(&self, bytes: &[u8]) -> bool {
        starts_with_request_line(bytes) || bytes.starts_with(b"SIP/2.0")
    }

    fn extract(&mut self, bytes: &[u8]) -> Result<Option<ExtractedMessage>, ParserError> {
        let header_end = match find_header_terminator(bytes) {
            Some(idx) => idx,
            None => return Ok(None),
        };
        let content_length = parse_content_length(&bytes[..header_end])?;
        let total = header_end + content_length;
        if bytes.len() < total {
            return Ok(None);
        }
        Ok(Some(ExtractedMessage {
            payload: bytes[..total].to_vec(),
            consumed: total,
            application_protocol_tag: "SIP",
        }))
    }

    fn reset(&mut self) {}
}

fn starts_with_request_line(bytes: &[u8]) -> bool {
    METHODS.iter().any(|m| {
        bytes.len() > m.len()
            && bytes[..m.len()].eq_ignore_ascii_case(m.as_bytes())
            && bytes[m.len()] == b' '
    })
}

/// Returns the byte offset just past the blank line that ends the header
/// block (`\r\n\r\n`, tolerating a bare `\n\n`).
fn find_header_terminator(bytes: &[u8]) -> Option<usize> {
    if let Some(pos) = find_subslice(bytes, b"\r\n\r\n") {
        return Some(pos + 4);
    }
    find_subslice(bytes, b"\n\n").map(|pos| pos + 2)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Absent `Content-Length` defaults to zero: a header-only SIP message
/// (many requests and most final responses carry no body).
fn parse_content_length(header_block: &[u8]) -> Result<usize, ParserError> {
    let text = String::from_utf8_lossy(header_block);
    for line in text.split("\r\n").flat_map(|l| l.split('\n')) {
        let mut parts = line.splitn(2, ':');
        let name = parts.next().unwrap_or("").trim();
        if name.eq_ignore_ascii_case("Content-Length") || name.eq_ignore_ascii_case("l") {
            let value = parts
                .next()
                .ok_or_else(|| ParserError::Malformed("Content-Length header has no value".into()))?
                .trim();
            return value
                .parse::<usize>()
                .map_err(|_| ParserError::Malformed(format!("invalid Content-Length {value:?}")));
        }
    }
    Ok(0)
}
