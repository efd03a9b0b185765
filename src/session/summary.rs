//! Run reporting

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::codec::DropStats;
use crate::instrument::StreamRate;

/// Gaps listed in the human-readable report
const REPORTED_GAPS: usize = 5;

/// Asynchronous notifications for the display collaborator
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The detection count increased to `count`
    Detection { count: u64 },
    /// The run hit a fatal error; call `stop()` to collect it
    Fault { message: String },
}

/// End-of-run statistics
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub rate: StreamRate,
    /// Datagrams read from the socket
    pub packets_received: u64,
    /// Datagrams expected at the effective rate over the run's duration
    pub packets_expected: u64,
    pub drops: DropStats,
    /// Datagrams truncated to the configured size
    pub oversized: u64,
    /// Sample points per channel that reached the detector
    pub samples_per_channel: u64,
    pub detections: u64,
    /// Rising edges that never fell back within the refractory width
    pub abandoned: u64,
}

impl RunSummary {
    /// True when no packet was lost
    pub fn passed(&self) -> bool {
        self.drops.total_dropped == 0
    }

    pub fn duration(&self) -> chrono::Duration {
        self.stopped_at - self.started_at
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.passed() {
            write!(
                f,
                "pass: No packets dropped out of {}. {} samples captured.",
                self.drops.packets_seen, self.samples_per_channel
            )?;
        } else {
            write!(
                f,
                "FAIL: Dropped {} out of {} packets in {} gaps:",
                self.drops.total_dropped,
                self.drops.packets_seen + self.drops.total_dropped,
                self.drops.gaps.len()
            )?;
            for record in self.drops.gaps.iter().take(REPORTED_GAPS) {
                write!(f, " {} at {},", record.gap, record.position)?;
            }
        }
        if self.drops.decode_errors > 0 {
            write!(f, " {} malformed.", self.drops.decode_errors)?;
        }
        write!(f, " {} events detected.", self.detections)
    }
}
