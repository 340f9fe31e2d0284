//! The application-protocol parser contract and the ordered composite that
//! dispatches to the first match.

pub mod dns;
pub mod http;
pub mod rtcp;
pub mod rtp;
pub mod sip;
pub mod ssh;
pub mod tls;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParserError {
    #[error("{0}")]
    Malformed(String),
}

/// One fully extracted application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedMessage {
    pub payload: Vec<u8>,
    pub consumed: usize,
    pub application_protocol_tag: &'static str,
}

/// `Detect`/`Extract`/`Reset`, as specified: detect is cheap and
/// side-effect-free; extract may return `Ok(None)` to mean "need more
/// data" (only meaningful on the TCP path, where more bytes might still
/// arrive); reset clears any per-stream state when a stream ends.
pub trait Parser: Send {
    fn tag(&self) -> &'static str;
    fn detect(&self, bytes: &[u8]) -> bool;
    fn extract(&mut self, bytes: &[u8]) -> Result<Option<ExtractedMessage>, ParserError>;
    fn reset(&mut self);
}

/// An ordered list of parsers. Order is operator-controlled priority:
/// `extract` dispatches to the first parser whose `detect` matches the
/// current buffer.
pub struct ParserComposite {
    parsers: Vec<Box<dyn Parser>>,
}

impl ParserComposite {
    pub fn new(parsers: Vec<Box<dyn Parser>>) -> Self {
        Self { parsers }
    }

    /// Builds the composite from a configured ordered tag list.
    pub fn from_tags(tags: &[String]) -> Self {
        let parsers = tags
            .iter()
            .filter_map(|tag| make_parser(tag))
            .collect();
        Self::new(parsers)
    }

    pub fn detect(&self, bytes: &[u8]) -> bool {
        self.parsers.iter().any(|p| p.detect(bytes))
    }

    pub fn extract(&mut self, bytes: &[u8]) -> Result<Option<ExtractedMessage>, ParserError> {
        match self.parsers.iter_mut().find(|p| p.detect(bytes)) {
            Some(parser) => parser.extract(bytes),
            None => Ok(None),
        }
    }

    pub fn reset_all(&mut self) {
        for parser in &mut self.parsers {
            parser.reset();
        }
    }
}

fn make_parser(tag: &str) -> Option<Box<dyn Parser>> {
    match tag {
        "SIP" => Some(Box::new(sip::SipParser::new())),
        "HTTP" => Some(Box::new(http::HttpParser::new())),
        "RTP" => Some(Box::new(rtp::RtpParser::new())),
        "RTCP" => Some(Box::new(rtcp::RtcpParser::new())),
        "DNS" => Some(Box::new(dns::DnsParser::new())),
        "TLS" => Some(Box::new(tls::TlsParser::new())),
        "SSH" => Some(Box::new(ssh::SshParser::new())),
        _ => None,
    }
}

/// Shared behavior for the detection-only parsers: once `detect` has
/// matched, the whole available buffer is treated as one message — there
/// is no further boundary within RTP/RTCP/DNS/TLS/SSH worth splitting on.
pub(crate) fn whole_buffer(bytes: &[u8], tag: &'static str) -> Option<ExtractedMessage> {
    if bytes.is_empty() {
        return None;
    }
    Some(ExtractedMessage {
        payload: bytes.to_vec(),
        consumed: bytes.len(),
        application_protocol_tag: tag,
    })
}
