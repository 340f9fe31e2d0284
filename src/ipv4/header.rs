//! IPv4 header parsing, RFC791 p11 s3.1.

use super::Ipv4Address;
use std::fmt::{self, Debug, Formatter};
use thiserror::Error;

/// Number of `u32` words in a basic (no-options) IPv4 header.
const BASE_WORDS: u8 = 5;
/// Number of bytes in a basic IPv4 header.
pub const BASE_OCTETS: u16 = BASE_WORDS as u16 * 4;
const FRAGMENT_OFFSET_MASK: u16 = 0x1fff;

/// A decoded IPv4 header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Header {
    pub ihl: u8,
    pub total_length: u16,
    pub identification: u16,
    pub fragment_offset: u16,
    pub flags: ControlFlags,
    pub time_to_live: u8,
    pub protocol: u8,
    pub source: Ipv4Address,
    pub destination: Ipv4Address,
}

impl Ipv4Header {
    /// The header length in bytes (`ihl * 4`).
    pub fn header_len(&self) -> usize {
        self.ihl as usize * 4
    }

    /// Parses a header from a byte iterator. Does not validate the header
    /// checksum: a passive capture agent has no second copy of the datagram
    /// to trust more than the one it is trying to decode, so a checksum
    /// mismatch is evidence of corruption, not a reason to refuse to read
    /// the rest of the fields.
    pub fn from_bytes(mut bytes: impl Iterator<Item = u8>) -> Result<Self, ParseError> {
        let mut next =
            || -> Result<u8, ParseError> { bytes.next().ok_or(ParseError::HeaderTooShort) };

        let version_and_ihl = next()?;
        let version = version_and_ihl >> 4;
        if version != 4 {
            return Err(ParseError::IncorrectVersion(version));
        }
        let ihl = version_and_ihl & 0b1111;
        if ihl < BASE_WORDS {
            return Err(ParseError::InvalidHeaderLength(ihl));
        }

        let _type_of_service = next()?;

        let total_length = u16::from_be_bytes([next()?, next()?]);
        let identification = u16::from_be_bytes([next()?, next()?]);

        let flags_and_fragment_offset = u16::from_be_bytes([next()?, next()?]);
        let fragment_offset = flags_and_fragment_offset & FRAGMENT_OFFSET_MASK;
        let flags = ControlFlags((flags_and_fragment_offset >> 13) as u8);

        let time_to_live = next()?;
        let protocol = next()?;
        let _checksum = u16::from_be_bytes([next()?, next()?]);

        let source: Ipv4Address = u32::from_be_bytes([next()?, next()?, next()?, next()?]).into();
        let destination: Ipv4Address =
            u32::from_be_bytes([next()?, next()?, next()?, next()?]).into();

        // Skip any IP options beyond the base 20 bytes.
        for _ in 0..(ihl.saturating_sub(BASE_WORDS) as usize * 4) {
            next()?;
        }

        Ok(Self {
            ihl,
            total_length,
            identification,
            fragment_offset,
            flags,
            time_to_live,
            protocol,
            source,
            destination,
        })
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("the IPv4 header is truncated")]
    HeaderTooShort,
    #[error("expected IPv4 version 4, found {0}")]
    IncorrectVersion(u8),
    #[error("IHL {0} is shorter than the minimum header")]
    InvalidHeaderLength(u8),
}

/// The fragmentation control bits: DF (don't fragment) and MF (more
/// fragments).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlFlags(u8);

impl ControlFlags {
    pub const fn new(dont_fragment: bool, more_fragments: bool) -> Self {
        Self((more_fragments as u8) | ((dont_fragment as u8) << 1))
    }

    pub const fn dont_fragment(&self) -> bool {
        self.0 & 0b10 != 0
    }

    pub const fn more_fragments(&self) -> bool {
        self.0 & 0b01 != 0
    }

    pub fn set_more_fragments(&mut self, value: bool) {
        self.0 = (self.0 & 0b10) | value as u8;
    }

    pub const fn as_u8(self) -> u8 {
        self.0
    }
}

impl Debug for ControlFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlFlags")
            .field("DF", &self.dont_fragment())
            .field("MF", &self.more_fragments())
            .finish()
    }
}

impl Default for ControlFlags {
    fn default() -> Self {
        Self::new(false, false)
    }
}

impl From<u8> for ControlFlags {
    fn from(byte: u8) -> Self {
        Self(byte)
    }
}
