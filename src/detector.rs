//! Hysteresis pulse detector
//!
//! A pulse counts once it rises through the threshold and falls back below
//! it within the refractory width. The window also suppresses re-triggering
//! on noise around the threshold for the rest of the pulse:
//!
//! ```text
//!   Idle{0} ──rising──► Armed{W} ──falling──► Idle{r-1}  (+1 detection)
//!      ▲                   │
//!      │                   └── W samples, no falling ──► Idle{0}
//!      └──── holdoff samples elapse ◄── Idle{h > 0}
//! ```

use crate::codec::DecodedPacket;
use crate::config::RunConfig;

/// Detector phase plus refractory countdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    /// Waiting for a rising edge. Edges are ignored while `holdoff > 0`,
    /// i.e. for the remainder of the window after a detection.
    Idle { holdoff: u32 },
    /// A rising edge was seen; `remaining` samples left to see it fall.
    Armed { remaining: u32 },
}

impl Default for DetectorState {
    fn default() -> Self {
        DetectorState::Idle { holdoff: 0 }
    }
}

impl DetectorState {
    pub fn is_idle(&self) -> bool {
        matches!(self, DetectorState::Idle { .. })
    }

    pub fn is_armed(&self) -> bool {
        matches!(self, DetectorState::Armed { .. })
    }
}

/// Outcome of one state transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub state: DetectorState,
    pub detected: bool,
    /// An armed candidate ran out of window without falling
    pub abandoned: bool,
}

/// Advance the detector by one sample.
///
/// `prev` and `cur` are consecutive samples, `threshold` is the crossing
/// level and `width` the refractory width in samples.
pub fn step(state: DetectorState, prev: f64, cur: f64, threshold: f64, width: u32) -> Transition {
    let rising = prev < threshold && threshold <= cur;
    let falling = prev >= threshold && threshold > cur;

    let (state, detected, abandoned) = match state {
        DetectorState::Idle { holdoff } if holdoff > 0 => {
            (DetectorState::Idle { holdoff: holdoff - 1 }, false, false)
        }
        DetectorState::Idle { .. } if rising => {
            (DetectorState::Armed { remaining: width }, false, false)
        }
        DetectorState::Idle { .. } => (DetectorState::Idle { holdoff: 0 }, false, false),
        DetectorState::Armed { remaining } if falling => (
            DetectorState::Idle {
                holdoff: remaining.saturating_sub(1),
            },
            true,
            false,
        ),
        DetectorState::Armed { remaining } if remaining <= 1 => {
            (DetectorState::Idle { holdoff: 0 }, false, true)
        }
        DetectorState::Armed { remaining } => {
            (DetectorState::Armed { remaining: remaining - 1 }, false, false)
        }
    };

    Transition {
        state,
        detected,
        abandoned,
    }
}

/// Streaming pulse detector over one channel
#[derive(Debug, Clone)]
pub struct EventDetector {
    threshold: f64,
    width: u32,
    state: DetectorState,
    /// Last sample seen, carried across batches
    last: Option<f64>,
    detections: u64,
    abandoned: u64,
    samples_processed: u64,
}

impl EventDetector {
    /// Create a detector. A zero width is treated as one sample.
    pub fn new(threshold: f64, width: u32) -> Self {
        Self {
            threshold,
            width: width.max(1),
            state: DetectorState::default(),
            last: None,
            detections: 0,
            abandoned: 0,
            samples_processed: 0,
        }
    }

    pub fn for_run(config: &RunConfig) -> Self {
        Self::new(config.threshold, config.refractory_width)
    }

    /// Feed one sample; returns true when it completes a pulse
    pub fn process_sample(&mut self, sample: f64) -> bool {
        self.samples_processed += 1;
        let Some(prev) = self.last.replace(sample) else {
            return false;
        };

        let transition = step(self.state, prev, sample, self.threshold, self.width);
        self.state = transition.state;
        if transition.abandoned {
            self.abandoned += 1;
        }
        if transition.detected {
            self.detections += 1;
        }
        transition.detected
    }

    /// Feed a batch of samples, calling `on_detect` with the running total
    /// after each detection. Returns the detections in this batch.
    pub fn process_with<I, F>(&mut self, samples: I, mut on_detect: F) -> u64
    where
        I: IntoIterator<Item = f64>,
        F: FnMut(u64),
    {
        let mut found = 0;
        for sample in samples {
            if self.process_sample(sample) {
                found += 1;
                on_detect(self.detections);
            }
        }
        found
    }

    /// Feed a batch of samples; returns the detections in this batch
    pub fn process<I: IntoIterator<Item = f64>>(&mut self, samples: I) -> u64 {
        self.process_with(samples, |_| {})
    }

    /// Feed one channel of a decoded packet
    pub fn process_packet<F: FnMut(u64)>(
        &mut self,
        packet: &DecodedPacket,
        channel: usize,
        stride: usize,
        on_detect: F,
    ) -> u64 {
        if packet.samples.is_empty() {
            return 0;
        }
        self.process_with(packet.samples.channel(channel, stride), on_detect)
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn detections(&self) -> u64 {
        self.detections
    }

    /// Return to Idle and forget the last sample, keeping counters
    pub fn reset(&mut self) {
        self.state = DetectorState::default();
        self.last = None;
    }

    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            detections: self.detections,
            abandoned: self.abandoned,
            samples_processed: self.samples_processed,
        }
    }
}

/// Detector statistics
#[derive(Debug, Clone, Default)]
pub struct DetectorStats {
    pub detections: u64,
    pub abandoned: u64,
    pub samples_processed: u64,
}
