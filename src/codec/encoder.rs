//! Datagram encoder
//!
//! Produces datagrams in the instrument's wire layout. Used to replay or
//! simulate a stream against the receiver.

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::RunConfig;
use crate::protocol::{PacketLength, SampleFormat, SEQUENCE_MASK};

/// Stream datagram encoder
pub struct PacketEncoder {
    packet_length: PacketLength,
    format: SampleFormat,
    /// Header word of the next datagram
    next_header: u32,
    /// Datagrams produced
    packets_encoded: u64,
}

impl PacketEncoder {
    pub fn new(packet_length: PacketLength, format: SampleFormat) -> Self {
        Self {
            packet_length,
            format,
            next_header: 0,
            packets_encoded: 0,
        }
    }

    pub fn for_run(config: &RunConfig) -> Self {
        Self::new(config.packet_length, config.format)
    }

    /// Values that fit in one datagram
    pub fn capacity(&self) -> usize {
        self.packet_length.payload_bytes() / self.format.element_size()
    }

    /// Set the sequence counter of the next datagram
    pub fn set_sequence(&mut self, sequence: u8) {
        self.next_header = (self.next_header & !SEQUENCE_MASK) | sequence as u32;
    }

    /// Encode `values` with the running sequence counter
    pub fn encode(&mut self, values: &[f64]) -> Bytes {
        let header = self.next_header;
        let sequence = (header.wrapping_add(1)) & SEQUENCE_MASK;
        self.next_header = (header & !SEQUENCE_MASK) | sequence;
        self.encode_with_header(header, values)
    }

    /// Encode `values` under an explicit header word.
    ///
    /// Values beyond the packet capacity are dropped; a short slice is
    /// zero-padded. Integer encoding saturates at the i16 range.
    pub fn encode_with_header(&mut self, header: u32, values: &[f64]) -> Bytes {
        let capacity = self.capacity();
        let mut buf = BytesMut::with_capacity(self.packet_length.datagram_bytes());
        buf.put_u32(header);

        let padded = values.iter().copied().chain(std::iter::repeat(0.0)).take(capacity);
        match self.format {
            SampleFormat::Int16 => padded.for_each(|v| buf.put_i16(v.round() as i16)),
            SampleFormat::Float32 => padded.for_each(|v| buf.put_f32(v as f32)),
        }

        self.packets_encoded += 1;
        buf.freeze()
    }

    pub fn packets_encoded(&self) -> u64 {
        self.packets_encoded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoder_layout() {
        let mut encoder = PacketEncoder::new(PacketLength::Bytes128, SampleFormat::Int16);
        assert_eq!(encoder.capacity(), 64);

        let datagram = encoder.encode_with_header(0x0102_0304, &[1.0, -2.0, 70000.0]);
        assert_eq!(datagram.len(), 132);
        assert_eq!(&datagram[..4], &[1, 2, 3, 4]);
        assert_eq!(&datagram[4..6], &1i16.to_be_bytes());
        assert_eq!(&datagram[6..8], &(-2i16).to_be_bytes());
        assert_eq!(&datagram[8..10], &i16::MAX.to_be_bytes());
        assert!(datagram[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_sequence_wraps() {
        let mut encoder = PacketEncoder::new(PacketLength::Bytes128, SampleFormat::Float32);
        encoder.set_sequence(254);

        let sequences: Vec<u8> = (0..3).map(|_| encoder.encode(&[])[3]).collect();
        assert_eq!(sequences, vec![254, 255, 0]);
        assert_eq!(encoder.packets_encoded(), 3);
    }
}
