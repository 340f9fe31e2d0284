//! The canonical flow identifier carried on every emitted record.

use crate::ipv4::Ipv4Address;
use std::fmt::{self, Display, Formatter};

/// Transport-layer protocol, keyed off the IPv4 protocol number.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum L4Protocol {
    Tcp = 6,
    Udp = 17,
}

impl TryFrom<u8> for L4Protocol {
    type Error = UnknownProtocol;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            6 => Ok(Self::Tcp),
            17 => Ok(Self::Udp),
            other => Err(UnknownProtocol(other)),
        }
    }
}

impl From<L4Protocol> for u8 {
    fn from(value: L4Protocol) -> Self {
        value as u8
    }
}

impl Display for L4Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}

/// An IP protocol number this pipeline does not dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnknownProtocol(pub u8);

impl Display for UnknownProtocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "no transport dispatch for IP protocol number {}", self.0)
    }
}

impl std::error::Error for UnknownProtocol {}

/// The canonical identifier of a transport flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    pub src_ip: Ipv4Address,
    pub dst_ip: Ipv4Address,
    pub src_port: u16,
    pub dst_port: u16,
    pub l4_protocol: L4Protocol,
}

impl Display for FiveTuple {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} ({})",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.l4_protocol
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_round_trip() {
        assert_eq!(L4Protocol::try_from(6u8).unwrap(), L4Protocol::Tcp);
        assert_eq!(L4Protocol::try_from(17u8).unwrap(), L4Protocol::Udp);
        assert!(L4Protocol::try_from(1u8).is_err());
        assert_eq!(u8::from(L4Protocol::Tcp), 6);
    }
}
