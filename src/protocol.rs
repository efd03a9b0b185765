//! Stream wire format definitions
//!
//! Every datagram the instrument sends is a 4-byte big-endian header word
//! followed by a fixed-size payload of big-endian sample values:
//!
//! ```text
//! ┌───────────────────────────┬──────────────────────────────────────────┐
//! │ header: u32 (BE)          │ payload: packet_length bytes             │
//! │ bits 0..8 = sequence (u8) │ i16 or f32 (BE), channels interleaved    │
//! └───────────────────────────┴──────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Size of the datagram header in bytes
pub const HEADER_LEN: usize = 4;

/// Mask extracting the rolling sequence counter from the header word
pub const SEQUENCE_MASK: u32 = 0xff;

/// Channels streamed by the instrument, in interleave order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ChannelSelection {
    #[default]
    X,
    XY,
    RT,
    XYRT,
}

impl ChannelSelection {
    /// Number of interleaved values per sample point
    pub fn count(self) -> usize {
        match self {
            ChannelSelection::X => 1,
            ChannelSelection::XY | ChannelSelection::RT => 2,
            ChannelSelection::XYRT => 4,
        }
    }

    /// Argument of the channel-select command
    pub fn as_str(self) -> &'static str {
        match self {
            ChannelSelection::X => "X",
            ChannelSelection::XY => "XY",
            ChannelSelection::RT => "RT",
            ChannelSelection::XYRT => "XYRT",
        }
    }
}

impl fmt::Display for ChannelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "X" => Ok(ChannelSelection::X),
            "XY" => Ok(ChannelSelection::XY),
            "RT" => Ok(ChannelSelection::RT),
            "XYRT" => Ok(ChannelSelection::XYRT),
            other => Err(format!("unknown channel selection: {}", other)),
        }
    }
}

/// Payload size class of each datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u16", into = "u16")]
pub enum PacketLength {
    #[default]
    Bytes1024,
    Bytes512,
    Bytes256,
    Bytes128,
}

impl PacketLength {
    pub const ALL: [PacketLength; 4] = [
        PacketLength::Bytes1024,
        PacketLength::Bytes512,
        PacketLength::Bytes256,
        PacketLength::Bytes128,
    ];

    /// Payload bytes per datagram
    pub fn payload_bytes(self) -> usize {
        match self {
            PacketLength::Bytes1024 => 1024,
            PacketLength::Bytes512 => 512,
            PacketLength::Bytes256 => 256,
            PacketLength::Bytes128 => 128,
        }
    }

    /// Full datagram size including the header
    pub fn datagram_bytes(self) -> usize {
        self.payload_bytes() + HEADER_LEN
    }

    /// Enumerated index understood by the instrument (0 = 1024 bytes)
    pub fn wire_index(self) -> u8 {
        match self {
            PacketLength::Bytes1024 => 0,
            PacketLength::Bytes512 => 1,
            PacketLength::Bytes256 => 2,
            PacketLength::Bytes128 => 3,
        }
    }

    pub fn from_wire_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl TryFrom<u16> for PacketLength {
    type Error = String;

    fn try_from(bytes: u16) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|len| len.payload_bytes() == bytes as usize)
            .ok_or_else(|| format!("unsupported packet length: {} bytes", bytes))
    }
}

impl From<PacketLength> for u16 {
    fn from(len: PacketLength) -> u16 {
        len.payload_bytes() as u16
    }
}

/// Encoding of each sample value on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit integers, big-endian
    #[default]
    Int16,
    /// IEEE-754 32-bit floats, big-endian
    Float32,
}

impl SampleFormat {
    pub fn element_size(self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Float32 => 4,
        }
    }

    /// Argument of the format-select command
    pub fn wire_code(self) -> u8 {
        match self {
            SampleFormat::Float32 => 0,
            SampleFormat::Int16 => 1,
        }
    }
}

/// Extract the rolling sequence counter from a header word
pub fn sequence_of(header: u32) -> u8 {
    (header & SEQUENCE_MASK) as u8
}
