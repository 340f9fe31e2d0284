//! Stateless per-datagram UDP framing. A single
//! UDP payload may carry several application messages back to back (SIP
//! over UDP is often batched this way), so the framer loops the parser
//! composite over the remaining bytes until it makes no further progress.

use crate::output::OutputPacket;
use crate::parser::ParserComposite;
use crate::transport::FiveTuple;

/// Frames one UDP payload into zero or more `OutputPacket`s, advancing a
/// shared `ParserComposite` across the datagram. Stops as soon as
/// detection fails or a parser reports a malformed message, since there is
/// no later segment to recover a UDP datagram's framing from.
pub fn frame(
    five_tuple: FiveTuple,
    timestamp_ns: i64,
    payload: &[u8],
    composite: &mut ParserComposite,
) -> Vec<OutputPacket> {
    let mut out = Vec::new();
    let mut offset = 0;
    while offset < payload.len() {
        let remaining = &payload[offset..];
        if !composite.detect(remaining) {
            break;
        }
        match composite.extract(remaining) {
            Ok(Some(extracted)) if extracted.consumed > 0 => {
                out.push(OutputPacket {
                    timestamp_ns,
                    five_tuple,
                    l4_protocol: five_tuple.l4_protocol,
                    application_protocol_tag: extracted.application_protocol_tag,
                    payload: extracted.payload,
                    raw_frame: None,
                });
                offset += extracted.consumed;
            }
            _ => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParserConfig;
    use crate::ipv4::Ipv4Address;
    use crate::transport::L4Protocol;

    fn tuple() -> FiveTuple {
        FiveTuple {
            src_ip: Ipv4Address::new([10, 0, 0, 1]),
            dst_ip: Ipv4Address::new([10, 0, 0, 2]),
            src_port: 5060,
            dst_port: 5060,
            l4_protocol: L4Protocol::Udp,
        }
    }

    #[test]
    fn frames_single_sip_message() {
        let mut composite = ParserComposite::from_tags(&ParserConfig::minimal_voip().enabled_tags);
        let payload = b"OPTIONS sip:bob SIP/2.0\r\n\r\n";
        let out = frame(tuple(), 0, payload, &mut composite);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].application_protocol_tag, "SIP");
    }

    #[test]
    fn frames_two_batched_sip_messages() {
        let mut composite = ParserComposite::from_tags(&ParserConfig::minimal_voip().enabled_tags);
        let mut payload = b"OPTIONS sip:bob SIP/2.0\r\n\r\n".to_vec();
        payload.extend_from_slice(b"SIP/2.0 200 OK\r\n\r\n");
        let out = frame(tuple(), 0, &payload, &mut composite);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn stops_on_unrecognized_trailing_bytes() {
        let mut composite = ParserComposite::from_tags(&ParserConfig::minimal_voip().enabled_tags);
        let mut payload = b"OPTIONS sip:bob SIP/2.0\r\n\r\n".to_vec();
        payload.extend_from_slice(&[0xff, 0xfe]);
        let out = frame(tuple(), 0, &payload, &mut composite);
        assert_eq!(out.len(), 1);
    }
}
