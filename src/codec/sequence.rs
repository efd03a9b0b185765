//! Packet-loss accounting over the 8-bit rolling sequence counter

use serde::{Deserialize, Serialize};

/// Packets missing between `prev` and `cur`, modulo 256.
///
/// Zero when `cur` directly follows `prev`, including the 255 → 0 wrap.
pub fn sequence_gap(prev: u8, cur: u8) -> u8 {
    cur.wrapping_sub(prev).wrapping_sub(1)
}

/// Tracks the previous sequence counter of a stream
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    prev: Option<u8>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe the next counter and return how many packets were lost
    /// before it. The first observed packet never counts as a loss.
    pub fn observe(&mut self, sequence: u8) -> u8 {
        let gap = match self.prev {
            Some(prev) => sequence_gap(prev, sequence),
            None => 0,
        };
        self.prev = Some(sequence);
        gap
    }

    /// Last observed counter
    pub fn last(&self) -> Option<u8> {
        self.prev
    }

    /// Forget the previous counter; the next packet starts a new stream
    pub fn reset(&mut self) {
        self.prev = None;
    }
}

/// One run of consecutive lost packets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropRecord {
    /// Packets missing
    pub gap: u32,
    /// Arrival index of the packet that revealed the gap
    pub position: u64,
}

/// Running packet-loss statistics for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DropStats {
    pub total_dropped: u64,
    pub gaps: Vec<DropRecord>,
    /// Datagrams that reached the decoder, including corrupt ones
    pub packets_seen: u64,
    pub decode_errors: u64,
}

impl DropStats {
    /// Record a datagram at `position` preceded by `gap` lost packets
    pub fn record(&mut self, position: u64, gap: u8) {
        self.packets_seen += 1;
        if gap > 0 {
            self.total_dropped += gap as u64;
            self.gaps.push(DropRecord {
                gap: gap as u32,
                position,
            });
        }
    }

    /// Record a datagram that could not be decoded
    pub fn record_decode_error(&mut self) {
        self.decode_errors += 1;
    }

    /// Fraction of expected packets that were lost
    pub fn loss_rate(&self) -> f64 {
        let expected = self.packets_seen + self.total_dropped;
        if expected == 0 {
            0.0
        } else {
            self.total_dropped as f64 / expected as f64
        }
    }
}
