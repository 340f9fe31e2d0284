//! End-to-end fixture scenarios driving the real decode/reassemble/dispatch/
//! parse chain frame by frame, the same sequence `partition::process_frame`
//! runs internally. Frames are hand-built byte-for-byte (mirroring the
//! header-level unit tests) rather than routed through a capture handle,
//! since there is no kernel socket to read from in a test process.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use voicecap_core::config::ParserConfig;
use voicecap_core::decode::{DecodedLayers, LayerParser};
use voicecap_core::dispatch::{self, Dispatched};
use voicecap_core::ipv4::reassembly::{Ipv4Reassembler, ReassemblyConfig};
use voicecap_core::parser::ParserComposite;
use voicecap_core::tcp::{TcpConfig, TcpReassembler};
use voicecap_core::udp;

const ETHERTYPE_IPV4: u16 = 0x0800;

fn ethernet_header() -> [u8; 14] {
    let mut header = [0u8; 14];
    header[12..14].copy_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
    header
}

/// Mirrors `ipv4::header`'s own test helper: a 20-byte IPv4 header with no
/// options and an unchecked checksum.
fn ipv4_header(more_fragments: bool, dont_fragment: bool, frag_offset_units: u16, id: u16, protocol: u8, payload_len: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(20);
    out.push((4u8 << 4) | 5);
    out.push(0);
    out.extend_from_slice(&(20 + payload_len).to_be_bytes());
    out.extend_from_slice(&id.to_be_bytes());
    let flags = ((dont_fragment as u16) << 1) | (more_fragments as u16);
    let flags_and_offset = (flags << 13) | (frag_offset_units & 0x1fff);
    out.extend_from_slice(&flags_and_offset.to_be_bytes());
    out.push(64);
    out.push(protocol);
    out.extend_from_slice(&[0, 0]);
    out.extend_from_slice(&[10, 0, 0, 1]);
    out.extend_from_slice(&[10, 0, 0, 2]);
    out
}

fn udp_header(src_port: u16, dst_port: u16, payload_len: u16) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[0..2].copy_from_slice(&src_port.to_be_bytes());
    out[2..4].copy_from_slice(&dst_port.to_be_bytes());
    out[4..6].copy_from_slice(&(8 + payload_len).to_be_bytes());
    out
}

fn tcp_header(src_port: u16, dst_port: u16, seq: u32, flag_bits: u8) -> [u8; 20] {
    let mut out = [0u8; 20];
    out[0..2].copy_from_slice(&src_port.to_be_bytes());
    out[2..4].copy_from_slice(&dst_port.to_be_bytes());
    out[4..8].copy_from_slice(&seq.to_be_bytes());
    out[12] = 5 << 4;
    out[13] = flag_bits;
    out
}

fn frame(ipv4_payload: &[u8], more_fragments: bool, frag_offset_units: u16, id: u16, protocol: u8) -> Vec<u8> {
    let mut out = ethernet_header().to_vec();
    out.extend(ipv4_header(more_fragments, !more_fragments && frag_offset_units == 0, frag_offset_units, id, protocol, ipv4_payload.len() as u16));
    out.extend_from_slice(ipv4_payload);
    out
}

fn decode(frame_bytes: &[u8]) -> Result<(voicecap_core::ipv4::Ipv4Header, Vec<u8>)> {
    let parser = LayerParser::new();
    let mut layers = DecodedLayers::new();
    parser.decode(frame_bytes, &mut layers).context("decode frame")?;
    let header = layers.ipv4.context("ipv4 layer present")?;
    let payload = frame_bytes[layers.ipv4_payload_offset..][..layers.ipv4_payload_len].to_vec();
    Ok((header, payload))
}

fn sip_composite() -> ParserComposite {
    ParserComposite::from_tags(&ParserConfig::minimal_voip().enabled_tags)
}

#[test]
fn single_unfragmented_udp_sip_message() -> Result<()> {
    let sip = b"OPTIONS sip:bob@example.com SIP/2.0\r\nContent-Length: 0\r\n\r\n";
    let mut udp_payload = udp_header(5060, 5060, sip.len() as u16).to_vec();
    udp_payload.extend_from_slice(sip);

    let f = frame(&udp_payload, false, 0, 1, 17);
    let (header, payload) = decode(&f)?;

    let mut reassembler = Ipv4Reassembler::new(ReassemblyConfig::default());
    let datagram = reassembler
        .ingest(header, &payload, 0, Instant::now())
        .context("reassemble datagram")?
        .context("unfragmented datagram passes through immediately")?;

    let dispatched = dispatch::dispatch(&datagram).context("dispatch datagram")?;
    let Dispatched::Udp { five_tuple, payload } = dispatched else {
        bail!("expected UDP dispatch");
    };

    let mut composite = sip_composite();
    let messages = udp::frame(five_tuple, 0, payload, &mut composite);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].application_protocol_tag, "SIP");
    assert_eq!(messages[0].payload, sip.to_vec());
    Ok(())
}

#[test]
fn two_reverse_order_ip_fragments_reassemble_into_one_sip_message() -> Result<()> {
    let sip = b"INVITE sip:bob@example.com SIP/2.0\r\nContent-Length: 0\r\n\r\n";
    let mut full_udp_payload = udp_header(5060, 5060, sip.len() as u16).to_vec();
    full_udp_payload.extend_from_slice(sip);

    // Split after byte 16 (a multiple of 8, as fragment offsets must be).
    let split_at = 16;
    let (first_half, second_half) = full_udp_payload.split_at(split_at);

    let frame_last = frame(second_half, false, (split_at / 8) as u16, 0xbeef, 17);
    let frame_first = frame(first_half, true, 0, 0xbeef, 17);

    let mut reassembler = Ipv4Reassembler::new(ReassemblyConfig::default());

    let (header_last, payload_last) = decode(&frame_last)?;
    let none = reassembler
        .ingest(header_last, &payload_last, 1, Instant::now())
        .context("ingest trailing fragment")?;
    assert!(none.is_none());

    let (header_first, payload_first) = decode(&frame_first)?;
    let datagram = reassembler
        .ingest(header_first, &payload_first, 2, Instant::now())
        .context("ingest leading fragment")?
        .context("reassembly completes once the first fragment arrives")?;

    let dispatched = dispatch::dispatch(&datagram).context("dispatch datagram")?;
    let Dispatched::Udp { five_tuple, payload } = dispatched else {
        bail!("expected UDP dispatch");
    };

    let mut composite = sip_composite();
    let messages = udp::frame(five_tuple, 0, payload, &mut composite);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].payload, sip.to_vec());
    Ok(())
}

#[test]
fn incomplete_fragment_buffer_is_evicted_on_timeout() -> Result<()> {
    let mut reassembler = Ipv4Reassembler::new(ReassemblyConfig {
        fragment_timeout: Duration::from_millis(5),
        ..Default::default()
    });

    let first_fragment_payload = vec![0xAAu8; 16];
    let f = frame(&first_fragment_payload, true, 0, 77, 17);
    let (header, payload) = decode(&f)?;
    let now = Instant::now();
    let result = reassembler
        .ingest(header, &payload, 0, now)
        .context("ingest leading fragment")?;
    assert!(result.is_none());
    assert_eq!(reassembler.buffer_count(), 1);

    let evicted = reassembler.sweep(now + Duration::from_millis(10));
    assert_eq!(evicted, 1);
    assert_eq!(reassembler.buffer_count(), 0);
    Ok(())
}

#[test]
fn tcp_sip_message_split_across_three_segments_with_reorder() -> Result<()> {
    let header_part = b"INVITE sip:bob@example.com SIP/2.0\r\nContent-Length: 8\r\n\r\n";
    let body_first = b"ping";
    let body_second = b"pong";

    let mut reassembler = TcpReassembler::new(TcpConfig::default(), ParserConfig::minimal_voip().enabled_tags);
    let now = Instant::now();

    let seq1 = 5000u32;
    let seq2 = seq1 + header_part.len() as u32;
    let seq3 = seq2 + body_first.len() as u32;

    for (seq, payload, flag_bits) in [(seq1, &header_part[..], 0u8), (seq3, &body_second[..], 0), (seq2, &body_first[..], 0)] {
        let tcp_bytes = tcp_header(40000, 5060, seq, flag_bits);
        let mut ip_payload = tcp_bytes.to_vec();
        ip_payload.extend_from_slice(payload);
        let f = frame(&ip_payload, false, 0, 1, 6);
        let (ip_header, ip_payload_bytes) = decode(&f)?;

        let mut ip_reassembler = Ipv4Reassembler::new(ReassemblyConfig::default());
        let datagram = ip_reassembler
            .ingest(ip_header, &ip_payload_bytes, 0, now)
            .context("ingest tcp-carrying datagram")?
            .context("unfragmented datagram passes through immediately")?;
        let dispatched = dispatch::dispatch(&datagram).context("dispatch datagram")?;
        let Dispatched::Tcp { five_tuple, header, payload } = dispatched else {
            bail!("expected TCP dispatch");
        };

        let outcome = reassembler.ingest(five_tuple, &header, payload, 0, now);
        if seq == seq2 {
            assert_eq!(outcome.messages.len(), 1);
            assert!(outcome.messages[0].payload.ends_with(b"pingpong"));
        } else {
            assert!(outcome.messages.is_empty());
        }
    }
    Ok(())
}

#[test]
fn udp_datagram_carrying_two_batched_sip_messages() -> Result<()> {
    let first = b"OPTIONS sip:bob SIP/2.0\r\nContent-Length: 0\r\n\r\n";
    let second = b"SIP/2.0 200 OK\r\nContent-Length: 0\r\n\r\n";
    let mut app_payload = first.to_vec();
    app_payload.extend_from_slice(second);

    let mut udp_payload = udp_header(5060, 5060, app_payload.len() as u16).to_vec();
    udp_payload.extend_from_slice(&app_payload);

    let f = frame(&udp_payload, false, 0, 2, 17);
    let (header, payload) = decode(&f)?;

    let mut reassembler = Ipv4Reassembler::new(ReassemblyConfig::default());
    let datagram = reassembler
        .ingest(header, &payload, 0, Instant::now())
        .context("ingest datagram")?
        .context("unfragmented datagram passes through immediately")?;
    let dispatched = dispatch::dispatch(&datagram).context("dispatch datagram")?;
    let Dispatched::Udp { five_tuple, payload } = dispatched else {
        bail!("expected UDP dispatch");
    };

    let mut composite = sip_composite();
    let messages = udp::frame(five_tuple, 0, payload, &mut composite);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].payload, first.to_vec());
    assert_eq!(messages[1].payload, second.to_vec());
    Ok(())
}

#[test]
fn rtp_is_detected_on_a_dynamic_port() -> Result<()> {
    let mut rtp_packet = vec![0x80, 0x00, 0x00, 0x01, 0, 0, 0, 1, 0, 0, 0, 2];
    rtp_packet.extend_from_slice(&[0x77u8; 160]);

    let mut udp_payload = udp_header(40102, 40200, rtp_packet.len() as u16).to_vec();
    udp_payload.extend_from_slice(&rtp_packet);

    let f = frame(&udp_payload, false, 0, 3, 17);
    let (header, payload) = decode(&f)?;

    let mut reassembler = Ipv4Reassembler::new(ReassemblyConfig::default());
    let datagram = reassembler
        .ingest(header, &payload, 0, Instant::now())
        .context("ingest datagram")?
        .context("unfragmented datagram passes through immediately")?;
    let dispatched = dispatch::dispatch(&datagram).context("dispatch datagram")?;
    let Dispatched::Udp { five_tuple, payload } = dispatched else {
        bail!("expected UDP dispatch");
    };

    let mut composite = sip_composite();
    let messages = udp::frame(five_tuple, 0, payload, &mut composite);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].application_protocol_tag, "RTP");
    Ok(())
}
