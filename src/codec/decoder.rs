//! Datagram decoder
//!
//! Splits a datagram into its header word and a vector of big-endian
//! sample values in the configured format.

use bytes::Buf;

use crate::config::RunConfig;
use crate::error::DecodeError;
use crate::protocol::{sequence_of, PacketLength, SampleFormat, HEADER_LEN};

/// Sample values of one datagram, channels interleaved
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    Int16(Vec<i16>),
    Float32(Vec<f32>),
}

impl Samples {
    pub fn len(&self) -> usize {
        match self {
            Samples::Int16(v) => v.len(),
            Samples::Float32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Value at `index` widened to f64
    pub fn get(&self, index: usize) -> Option<f64> {
        match self {
            Samples::Int16(v) => v.get(index).map(|&x| x as f64),
            Samples::Float32(v) => v.get(index).map(|&x| x as f64),
        }
    }

    /// Iterate the values of one channel out of `stride` interleaved channels.
    /// A channel outside the stride yields nothing.
    pub fn channel(&self, channel: usize, stride: usize) -> ChannelIter<'_> {
        let stride = stride.max(1);
        ChannelIter {
            samples: self,
            position: if channel < stride { channel } else { self.len() },
            stride,
        }
    }

    /// Iterate all values in wire order
    pub fn iter(&self) -> ChannelIter<'_> {
        self.channel(0, 1)
    }
}

/// Iterator over a single interleaved channel
pub struct ChannelIter<'a> {
    samples: &'a Samples,
    position: usize,
    stride: usize,
}

impl Iterator for ChannelIter<'_> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        let value = self.samples.get(self.position)?;
        self.position += self.stride;
        Some(value)
    }
}

/// A successfully decoded datagram
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    /// Arrival index within the run
    pub index: u64,
    /// Raw header word
    pub header: u32,
    /// Rolling sequence counter (low byte of the header)
    pub sequence: u8,
    pub samples: Samples,
}

/// Fixed-layout datagram decoder
pub struct PacketDecoder {
    format: SampleFormat,
    /// Expected datagram size including header
    expected_len: usize,
    /// Datagrams decoded successfully
    packets_decoded: u64,
    /// Datagrams rejected
    decode_errors: u64,
    /// Values produced
    values_decoded: u64,
}

impl PacketDecoder {
    /// Create a decoder for the given wire layout
    pub fn new(packet_length: PacketLength, format: SampleFormat) -> Self {
        Self {
            format,
            expected_len: packet_length.datagram_bytes(),
            packets_decoded: 0,
            decode_errors: 0,
            values_decoded: 0,
        }
    }

    /// Create a decoder matching a run configuration
    pub fn for_run(config: &RunConfig) -> Self {
        Self::new(config.packet_length, config.format)
    }

    /// Read the header word without decoding the payload
    pub fn peek_header(datagram: &[u8]) -> Option<u32> {
        let mut head = datagram.get(..HEADER_LEN)?;
        Some(head.get_u32())
    }

    /// Decode a datagram received at position `index` of the run
    pub fn decode(&mut self, index: u64, datagram: &[u8]) -> Result<DecodedPacket, DecodeError> {
        match self.decode_inner(index, datagram) {
            Ok(packet) => {
                self.packets_decoded += 1;
                self.values_decoded += packet.samples.len() as u64;
                Ok(packet)
            }
            Err(e) => {
                self.decode_errors += 1;
                Err(e)
            }
        }
    }

    fn decode_inner(&self, index: u64, datagram: &[u8]) -> Result<DecodedPacket, DecodeError> {
        if datagram.len() < HEADER_LEN {
            return Err(DecodeError::MissingHeader(datagram.len()));
        }
        if datagram.len() < self.expected_len {
            return Err(DecodeError::Truncated {
                expected: self.expected_len,
                actual: datagram.len(),
            });
        }

        let element_size = self.format.element_size();
        let mut buf = datagram;
        let header = buf.get_u32();
        if buf.remaining() % element_size != 0 {
            return Err(DecodeError::Misaligned {
                len: buf.remaining(),
                element_size,
            });
        }

        let count = buf.remaining() / element_size;
        let samples = match self.format {
            SampleFormat::Int16 => Samples::Int16((0..count).map(|_| buf.get_i16()).collect()),
            SampleFormat::Float32 => Samples::Float32((0..count).map(|_| buf.get_f32()).collect()),
        };

        Ok(DecodedPacket {
            index,
            header,
            sequence: sequence_of(header),
            samples,
        })
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    pub fn expected_len(&self) -> usize {
        self.expected_len
    }

    /// Get statistics
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            packets_decoded: self.packets_decoded,
            decode_errors: self.decode_errors,
            values_decoded: self.values_decoded,
        }
    }
}

/// Decoder statistics
#[derive(Debug, Clone, Default)]
pub struct DecoderStats {
    pub packets_decoded: u64,
    pub decode_errors: u64,
    pub values_decoded: u64,
}
