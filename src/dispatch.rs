//! Routes a reassembled IPv4 datagram to the UDP or TCP path.

use crate::decode::{tcp_header, udp_header};
use crate::ipv4::Ipv4Datagram;
use crate::transport::{FiveTuple, L4Protocol};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    #[error("payload shorter than the minimum {protocol} header")]
    PayloadTooShort { protocol: L4Protocol },
    #[error("no transport dispatch for IP protocol number {0}")]
    UnhandledProtocol(u8),
}

pub enum Dispatched<'a> {
    Udp {
        five_tuple: FiveTuple,
        payload: &'a [u8],
    },
    Tcp {
        five_tuple: FiveTuple,
        header: tcp_header::TcpHeader,
        payload: &'a [u8],
    },
}

/// Inspects a reassembled datagram's protocol field and hands back the
/// pieces the UDP framer or TCP reassembler needs. Borrows the datagram's
/// payload rather than copying it.
pub fn dispatch(datagram: &Ipv4Datagram) -> Result<Dispatched<'_>, DispatchError> {
    match datagram.protocol {
        17 => {
            if datagram.payload.len() < udp_header::HEADER_LEN {
                return Err(DispatchError::PayloadTooShort {
                    protocol: L4Protocol::Udp,
                });
            }
            let header = udp_header::parse(&datagram.payload)
                .map_err(|_| DispatchError::PayloadTooShort { protocol: L4Protocol::Udp })?;
            let five_tuple = FiveTuple {
                src_ip: datagram.src_ip,
                dst_ip: datagram.dst_ip,
                src_port: header.source,
                dst_port: header.destination,
                l4_protocol: L4Protocol::Udp,
            };
            Ok(Dispatched::Udp {
                five_tuple,
                payload: &datagram.payload[udp_header::HEADER_LEN..],
            })
        }
        6 => {
            if datagram.payload.len() < tcp_header::BASE_HEADER_LEN {
                return Err(DispatchError::PayloadTooShort {
                    protocol: L4Protocol::Tcp,
                });
            }
            let header = tcp_header::parse(&datagram.payload)
                .map_err(|_| DispatchError::PayloadTooShort { protocol: L4Protocol::Tcp })?;
            let five_tuple = FiveTuple {
                src_ip: datagram.src_ip,
                dst_ip: datagram.dst_ip,
                src_port: header.source,
                dst_port: header.destination,
                l4_protocol: L4Protocol::Tcp,
            };
            let offset = header.data_offset_bytes;
            Ok(Dispatched::Tcp {
                five_tuple,
                header,
                payload: &datagram.payload[offset..],
            })
        }
        other => Err(DispatchError::UnhandledProtocol(other)),
    }
}
