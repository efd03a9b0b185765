//! # Lock-in Stream
//!
//! Real-time UDP sample streaming and pulse detection for lock-in amplifiers.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                         LOCK-IN AMPLIFIER                          │
//! │  control link (text commands)        UDP: [Header | BE samples]    │
//! └──────────▲──────────────────────────────────────┬──────────────────┘
//!            │ instrument::InstrumentLink           │ UDP over LAN
//!            │                                      ▼
//! ┌──────────┴──────────────────────────────────────────────────────────┐
//! │  session::StreamSession (start / stop / events / snapshots)         │
//! │                                                                     │
//! │  ┌───────────────┐ bounded ┌────────────────┐ bounded ┌──────────┐  │
//! │  │ udp-receiver  │────────►│ packet-decoder │────────►│  event-  │  │
//! │  │ network::     │  Bytes  │ codec decoder  │ packets │ detector │  │
//! │  │   receiver    │         │ + sequence     │         │          │  │
//! │  └───────────────┘         └───────┬────────┘         └────┬─────┘  │
//! │                                    ▼                       ▼        │
//! │                                DropStats            DetectionCount  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod config;
pub mod detector;
pub mod error;
pub mod instrument;
pub mod network;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default requested sample rate in S/s
    pub const DEFAULT_SAMPLE_RATE: f64 = 1e4;

    /// Default UDP port the instrument streams to
    pub const DEFAULT_UDP_PORT: u16 = 1865;

    /// Default instrument address
    pub const DEFAULT_INSTRUMENT_ADDRESS: &str = "192.168.1.100";

    /// Default raw-socket control port of the instrument
    pub const DEFAULT_CONTROL_PORT: u16 = 5025;

    /// Default socket receive buffer (bytes)
    pub const DEFAULT_RECV_BUFFER_SIZE: usize = 4 * 1024 * 1024;

    /// Default capacity of each inter-stage queue (in packets)
    pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

    /// Scratch buffer for socket reads; anything beyond the expected
    /// datagram size is truncated after the read
    pub const MAX_DATAGRAM_SIZE: usize = 65_536;

    /// Maximum decimation exponent accepted by the instrument
    pub const MAX_DECIMATION: u32 = 20;

    /// Interval between periodic pipeline statistics logs
    pub const STATS_INTERVAL_SECS: u64 = 5;
}
