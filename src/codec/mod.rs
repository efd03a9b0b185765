//! Stream datagram codec
//!
//! Decodes raw instrument datagrams into typed sample vectors and tracks
//! the rolling sequence counter for packet-loss accounting.

pub mod decoder;
pub mod encoder;
pub mod sequence;

pub use decoder::{DecodedPacket, PacketDecoder, Samples};
pub use encoder::PacketEncoder;
pub use sequence::{DropRecord, DropStats, SequenceTracker};
