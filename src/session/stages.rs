//! Decoder and detector worker loops
//!
//! Both loops run until their input channel disconnects, which happens
//! once the upstream stage has exited. Anything already queued is drained
//! first so the final statistics account for every received datagram.

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::codec::decoder::DecoderStats;
use crate::codec::{DecodedPacket, DropStats, PacketDecoder, SequenceTracker};
use crate::config::RunConfig;
use crate::constants::STATS_INTERVAL_SECS;
use crate::detector::{DetectorStats, EventDetector};
use crate::network::RawDatagram;
use crate::session::summary::SessionEvent;

/// Decode errors logged at warn level before falling back to debug
const LOUD_DECODE_ERRORS: u64 = 10;

/// Packet decoding and loss accounting stage
pub(crate) struct DecoderStage {
    pub decoder: PacketDecoder,
    pub tracker: SequenceTracker,
    pub drops: Arc<Mutex<DropStats>>,
    pub input: Receiver<RawDatagram>,
    pub output: Sender<DecodedPacket>,
    pub track_corrupt_sequence: bool,
}

impl DecoderStage {
    pub fn new(
        config: &RunConfig,
        drops: Arc<Mutex<DropStats>>,
        input: Receiver<RawDatagram>,
        output: Sender<DecodedPacket>,
        track_corrupt_sequence: bool,
    ) -> Self {
        Self {
            decoder: PacketDecoder::for_run(config),
            tracker: SequenceTracker::new(),
            drops,
            input,
            output,
            track_corrupt_sequence,
        }
    }

    pub fn run(mut self) -> DecoderStats {
        let interval = Duration::from_secs(STATS_INTERVAL_SECS);
        let mut last_stats_time = Instant::now();

        for datagram in self.input.iter() {
            match self.decoder.decode(datagram.index, &datagram.payload) {
                Ok(packet) => {
                    let gap = self.tracker.observe(packet.sequence);
                    self.drops.lock().record(packet.index, gap);
                    if gap > 0 {
                        tracing::debug!("{} packets lost before #{}", gap, packet.index);
                    }
                    if self.output.send(packet).is_err() {
                        tracing::debug!("Detector hung up, decoder exiting");
                        break;
                    }
                }
                Err(e) => {
                    let gap = match PacketDecoder::peek_header(&datagram.payload) {
                        Some(header) if self.track_corrupt_sequence => {
                            self.tracker.observe(crate::protocol::sequence_of(header))
                        }
                        _ => 0,
                    };
                    let errors = {
                        let mut drops = self.drops.lock();
                        drops.record(datagram.index, gap);
                        drops.record_decode_error();
                        drops.decode_errors
                    };
                    if errors <= LOUD_DECODE_ERRORS {
                        tracing::warn!("Discarding datagram #{}: {}", datagram.index, e);
                    } else {
                        tracing::debug!("Discarding datagram #{}: {}", datagram.index, e);
                    }
                }
            }

            if last_stats_time.elapsed() >= interval {
                last_stats_time = Instant::now();
                let drops = self.drops.lock();
                tracing::info!(
                    "Stream stats: {} packets, {} dropped ({:.2}% loss), {} malformed",
                    drops.packets_seen,
                    drops.total_dropped,
                    drops.loss_rate() * 100.0,
                    drops.decode_errors
                );
            }
        }

        self.decoder.stats()
    }
}

/// Pulse detection stage
pub(crate) struct DetectorStage {
    pub detector: EventDetector,
    pub channel: usize,
    pub stride: usize,
    pub count: Arc<AtomicU64>,
    pub events: Sender<SessionEvent>,
    pub input: Receiver<DecodedPacket>,
}

impl DetectorStage {
    pub fn new(
        config: &RunConfig,
        count: Arc<AtomicU64>,
        events: Sender<SessionEvent>,
        input: Receiver<DecodedPacket>,
    ) -> Self {
        Self {
            detector: EventDetector::for_run(config),
            channel: config.detect_channel,
            stride: config.channels.count(),
            count,
            events,
            input,
        }
    }

    pub fn run(mut self) -> DetectorStats {
        for packet in self.input.iter() {
            let count = &self.count;
            let events = &self.events;
            self.detector.process_packet(&packet, self.channel, self.stride, |total| {
                count.store(total, Ordering::Release);
                // A lagging subscriber misses intermediate counts only
                let _ = events.try_send(SessionEvent::Detection { count: total });
            });
        }

        let stats = self.detector.stats();
        tracing::debug!(
            "Detector finished: {} detections, {} abandoned, {} samples",
            stats.detections,
            stats.abandoned,
            stats.samples_processed
        );
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DropRecord, PacketEncoder};
    use bytes::Bytes;
    use crossbeam_channel::bounded;

    fn raw(index: u64, payload: Bytes) -> RawDatagram {
        RawDatagram { index, payload }
    }

    #[test]
    fn test_decoder_stage_accounts_losses_and_errors() {
        let config = RunConfig::default();
        let mut encoder = PacketEncoder::for_run(&config);
        let drops = Arc::new(Mutex::new(DropStats::default()));
        let (raw_tx, raw_rx) = bounded(16);
        let (packet_tx, packet_rx) = bounded(16);

        encoder.set_sequence(5);
        raw_tx.send(raw(0, encoder.encode(&[1.0]))).unwrap();
        encoder.set_sequence(7);
        raw_tx.send(raw(1, encoder.encode(&[2.0]))).unwrap();
        // Corrupt packet carrying sequence 8, then 9 arrives intact
        raw_tx.send(raw(2, Bytes::from_static(&[0, 0, 0, 8, 1]))).unwrap();
        encoder.set_sequence(9);
        raw_tx.send(raw(3, encoder.encode(&[3.0]))).unwrap();
        drop(raw_tx);

        let stage = DecoderStage::new(&config, drops.clone(), raw_rx, packet_tx, true);
        let stats = stage.run();

        assert_eq!(stats.packets_decoded, 3);
        assert_eq!(stats.decode_errors, 1);
        let drops = drops.lock().clone();
        assert_eq!(drops.total_dropped, 1);
        assert_eq!(drops.gaps, vec![DropRecord { gap: 1, position: 1 }]);
        assert_eq!(drops.packets_seen, 4);
        assert_eq!(drops.decode_errors, 1);

        let forwarded: Vec<u64> = packet_rx.iter().map(|p| p.index).collect();
        assert_eq!(forwarded, vec![0, 1, 3]);
    }

    #[test]
    fn test_decoder_stage_untracked_corruption() {
        let config = RunConfig::default();
        let mut encoder = PacketEncoder::for_run(&config);
        let drops = Arc::new(Mutex::new(DropStats::default()));
        let (raw_tx, raw_rx) = bounded(16);
        let (packet_tx, _packet_rx) = bounded(16);

        encoder.set_sequence(1);
        raw_tx.send(raw(0, encoder.encode(&[]))).unwrap();
        raw_tx.send(raw(1, Bytes::from_static(&[0, 0, 0, 2]))).unwrap();
        encoder.set_sequence(3);
        raw_tx.send(raw(2, encoder.encode(&[]))).unwrap();
        drop(raw_tx);

        DecoderStage::new(&config, drops.clone(), raw_rx, packet_tx, false).run();

        // Without tracking, the corrupt packet shows up as one lost packet
        assert_eq!(drops.lock().gaps, vec![DropRecord { gap: 1, position: 2 }]);
    }

    #[test]
    fn test_detector_stage_counts_and_notifies() {
        let config = RunConfig { threshold: 1.0, refractory_width: 3, ..Default::default() };
        let mut encoder = PacketEncoder::for_run(&config);
        let count = Arc::new(AtomicU64::new(0));
        let (events_tx, events_rx) = bounded(8);
        let (packet_tx, packet_rx) = bounded(8);

        let mut decoder = PacketDecoder::for_run(&config);
        let datagram = encoder.encode(&[0.0, 2.0, 5.0, 3.0, -1.0, 0.0]);
        packet_tx.send(decoder.decode(0, &datagram).unwrap()).unwrap();
        drop(packet_tx);

        let stats = DetectorStage::new(&config, count.clone(), events_tx, packet_rx).run();

        assert_eq!(stats.detections, 1);
        assert_eq!(count.load(Ordering::Acquire), 1);
        assert_eq!(events_rx.try_recv(), Ok(SessionEvent::Detection { count: 1 }));
        assert!(events_rx.try_recv().is_err());
    }
}
