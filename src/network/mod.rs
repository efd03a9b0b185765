//! Network subsystem for UDP stream ingestion

pub mod receiver;
pub mod udp;

pub use receiver::{RawDatagram, ReceiverCounters, ReceiverStats, SocketReceiver};
pub use udp::create_socket;
