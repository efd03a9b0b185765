//! Instrument control link
//!
//! The lock-in amplifier is armed and configured over a text command link
//! separate from the UDP data stream.

pub mod commands;
pub mod link;
pub mod mock;

pub use commands::{
    compute_decimation, configure_stream, query_max_rate, set_destination_port, set_streaming,
    StreamRate,
};
pub use link::{InstrumentLink, TcpInstrument};
pub use mock::MockInstrument;
