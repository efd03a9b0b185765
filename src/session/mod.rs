//! Streaming session orchestration
//!
//! [`StreamSession`] owns the instrument link, the receive socket and the
//! three pipeline threads of a run. It exposes an explicit command
//! interface (`start` / `stop`) plus snapshots and an event subscription
//! for a display front end.

pub mod stages;
pub mod summary;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use uuid::Uuid;

use crate::codec::decoder::DecoderStats;
use crate::codec::DropStats;
use crate::config::{NetworkConfig, PipelineConfig, RunConfig};
use crate::detector::DetectorStats;
use crate::error::{Error, NetworkError, Result, SessionError};
use crate::instrument::{configure_stream, set_streaming, InstrumentLink, StreamRate};
use crate::network::{create_socket, ReceiverCounters, ReceiverStats, SocketReceiver};

use stages::{DecoderStage, DetectorStage};
pub use summary::{RunSummary, SessionEvent};

/// State of the run in progress
struct ActiveRun {
    run_id: Uuid,
    config: RunConfig,
    rate: StreamRate,
    started_at: DateTime<Utc>,
    started: Instant,
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    receiver_counters: Arc<ReceiverCounters>,
    receiver: JoinHandle<std::result::Result<(), NetworkError>>,
    decoder: JoinHandle<DecoderStats>,
    detector: JoinHandle<DetectorStats>,
}

/// Streaming session: one instrument, at most one run at a time
pub struct StreamSession {
    link: Box<dyn InstrumentLink>,
    network: NetworkConfig,
    pipeline: PipelineConfig,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    /// Statistics of the current or last run
    drops: Arc<Mutex<DropStats>>,
    detections: Arc<AtomicU64>,
    active: Option<ActiveRun>,
}

impl StreamSession {
    /// Create a session over an open instrument link
    pub fn new(link: Box<dyn InstrumentLink>, network: NetworkConfig, pipeline: PipelineConfig) -> Self {
        let (events_tx, events_rx) = bounded(pipeline.event_queue_capacity.max(1));
        Self {
            link,
            network,
            pipeline,
            events_tx,
            events_rx,
            drops: Arc::new(Mutex::new(DropStats::default())),
            detections: Arc::new(AtomicU64::new(0)),
            active: None,
        }
    }

    /// Configure the instrument and start streaming.
    ///
    /// The configuration is validated before any network activity. The
    /// socket is bound before the instrument is armed, so a bind failure
    /// never leaves the instrument streaming.
    pub fn start(&mut self, config: RunConfig) -> Result<StreamRate> {
        if self.active.is_some() {
            return Err(SessionError::AlreadyRunning.into());
        }
        config.validate()?;

        let socket = create_socket(&self.network)?;
        self.start_on(socket, config)
    }

    /// Arm the instrument towards `socket` and spawn the pipeline
    fn start_on(&mut self, socket: UdpSocket, config: RunConfig) -> Result<StreamRate> {
        let local_addr = socket.local_addr()?;

        let rate = match configure_stream(&mut self.link, &config, local_addr.port()) {
            Ok(rate) => rate,
            Err(e) => {
                tracing::error!("Instrument configuration failed: {}", e);
                self.disarm_after_failure();
                return Err(e.into());
            }
        };

        // Fresh statistics; stale events from a previous run are discarded
        while self.events_rx.try_recv().is_ok() {}
        self.drops = Arc::new(Mutex::new(DropStats::default()));
        self.detections = Arc::new(AtomicU64::new(0));

        let running = Arc::new(AtomicBool::new(true));
        let (raw_tx, raw_rx) = bounded(self.pipeline.raw_queue_capacity.max(1));
        let (packet_tx, packet_rx) = bounded(self.pipeline.sample_queue_capacity.max(1));

        let receiver = SocketReceiver::new(
            socket,
            config.packet_length.datagram_bytes(),
            raw_tx,
            running.clone(),
        );
        let receiver_counters = receiver.counters();
        let decoder = DecoderStage::new(
            &config,
            self.drops.clone(),
            raw_rx,
            packet_tx,
            self.pipeline.track_corrupt_sequence,
        );
        let detector = DetectorStage::new(
            &config,
            self.detections.clone(),
            self.events_tx.clone(),
            packet_rx,
        );

        let events = (self.events_tx.clone(), self.events_rx.clone());
        let handles = spawn_stages(receiver, decoder, detector, events);
        let (receiver, decoder, detector) = match handles {
            Ok(handles) => handles,
            Err(e) => {
                // Started stages unwind through `running` and channel hang-ups
                running.store(false, Ordering::Release);
                self.disarm_after_failure();
                return Err(e.into());
            }
        };

        let run_id = Uuid::new_v4();
        tracing::info!(
            %run_id,
            "Streaming {} as {:?} at {:.3} kS/s into {}",
            config.channels,
            config.format,
            rate.effective_rate * 1e-3,
            local_addr
        );

        self.active = Some(ActiveRun {
            run_id,
            config,
            rate,
            started_at: Utc::now(),
            started: Instant::now(),
            local_addr,
            running,
            receiver_counters,
            receiver,
            decoder,
            detector,
        });
        Ok(rate)
    }

    /// Disarm the instrument, stop all stages and wait for them to exit.
    ///
    /// Returns the run summary, or the run's terminal error if a stage
    /// failed. Statistics snapshots remain readable either way.
    pub fn stop(&mut self) -> Result<RunSummary> {
        let run = self.active.take().ok_or(SessionError::NotRunning)?;

        let disarm = set_streaming(&mut self.link, false);
        run.running.store(false, Ordering::Release);

        let receiver = run
            .receiver
            .join()
            .map_err(|_| Error::from(SessionError::StagePanicked("udp-receiver")));
        let decoder = run
            .decoder
            .join()
            .map_err(|_| Error::from(SessionError::StagePanicked("packet-decoder")));
        let detector = run
            .detector
            .join()
            .map_err(|_| Error::from(SessionError::StagePanicked("event-detector")));
        let elapsed = run.started.elapsed();
        tracing::info!(run_id = %run.run_id, "Stopped streaming after {:.1}s", elapsed.as_secs_f64());

        receiver??;
        let decoder = decoder?;
        let detector = detector?;
        disarm?;

        let receiver_stats = run.receiver_counters.snapshot();
        Ok(RunSummary {
            run_id: run.run_id,
            started_at: run.started_at,
            stopped_at: Utc::now(),
            rate: run.rate,
            packets_received: receiver_stats.datagrams,
            packets_expected: run.rate.expected_packets(&run.config, elapsed),
            drops: self.drops.lock().clone(),
            oversized: receiver_stats.oversized,
            samples_per_channel: decoder.values_decoded / run.config.channels.count() as u64,
            detections: detector.detections,
            abandoned: detector.abandoned,
        })
    }

    /// Best-effort STREAM OFF after a failed start
    fn disarm_after_failure(&mut self) {
        if let Err(e) = set_streaming(&mut self.link, false) {
            tracing::warn!("Could not disarm instrument after failed start: {}", e);
        }
    }

    /// Stop any run in progress and close the instrument link
    pub fn close(mut self) -> Result<()> {
        let stopped = if self.active.is_some() {
            self.stop().map(|_| ())
        } else {
            Ok(())
        };
        self.link.close()?;
        stopped
    }

    /// Event subscription for a single display consumer.
    ///
    /// The queue is bounded. Detection events are dropped while it is full,
    /// but a fault evicts stale events so it is always delivered.
    pub fn events(&self) -> Receiver<SessionEvent> {
        self.events_rx.clone()
    }

    /// True while a run is streaming without a fault
    pub fn is_running(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|run| run.running.load(Ordering::Acquire))
    }

    /// True while a run exists that `stop()` has not collected
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn detection_count(&self) -> u64 {
        self.detections.load(Ordering::Acquire)
    }

    pub fn drop_stats(&self) -> DropStats {
        self.drops.lock().clone()
    }

    pub fn receiver_stats(&self) -> Option<ReceiverStats> {
        self.active.as_ref().map(|run| run.receiver_counters.snapshot())
    }

    /// Address the current run receives on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.active.as_ref().map(|run| run.local_addr)
    }

    pub fn stream_rate(&self) -> Option<StreamRate> {
        self.active.as_ref().map(|run| run.rate)
    }

    pub fn run_config(&self) -> Option<&RunConfig> {
        self.active.as_ref().map(|run| &run.config)
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.active.is_some() {
            if let Err(e) = self.stop() {
                tracing::warn!("Run ended with error during drop: {}", e);
            }
        }
    }
}

type StageHandles = (
    JoinHandle<std::result::Result<(), NetworkError>>,
    JoinHandle<DecoderStats>,
    JoinHandle<DetectorStats>,
);

/// Spawn consumers before producers so nothing is queued without a reader
fn spawn_stages(
    receiver: SocketReceiver,
    decoder: DecoderStage,
    detector: DetectorStage,
    events: (Sender<SessionEvent>, Receiver<SessionEvent>),
) -> std::io::Result<StageHandles> {
    let detector = thread::Builder::new()
        .name("event-detector".into())
        .spawn(move || detector.run())?;
    let decoder = thread::Builder::new()
        .name("packet-decoder".into())
        .spawn(move || decoder.run())?;
    let receiver = thread::Builder::new()
        .name("udp-receiver".into())
        .spawn(move || {
            let result = receiver.run();
            if let Err(e) = &result {
                publish_fault(&events.0, &events.1, e.to_string());
            }
            result
        })?;
    Ok((receiver, decoder, detector))
}

/// Queue a fault event, discarding the oldest events until it fits.
/// Detection counts are cumulative, so a newer event supersedes them.
fn publish_fault(tx: &Sender<SessionEvent>, rx: &Receiver<SessionEvent>, message: String) {
    let mut event = SessionEvent::Fault { message };
    loop {
        match tx.try_send(event) {
            Ok(()) => return,
            Err(TrySendError::Full(pending)) => {
                let _ = rx.try_recv();
                event = pending;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::MockInstrument;
    use std::net::IpAddr;
    use std::time::Duration;

    fn loopback() -> NetworkConfig {
        NetworkConfig {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            udp_port: 0,
            read_timeout_ms: 10,
            ..Default::default()
        }
    }

    fn session(mock: &MockInstrument) -> StreamSession {
        StreamSession::new(Box::new(mock.clone()), loopback(), PipelineConfig::default())
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mock = MockInstrument::new(1e5);
        let mut session = session(&mock);

        session.start(RunConfig::default()).unwrap();
        assert!(session.is_running());
        let err = session.start(RunConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::AlreadyRunning)));

        session.stop().unwrap();
        assert!(!session.is_active());
    }

    #[test]
    fn test_invalid_config_sends_nothing() {
        let mock = MockInstrument::new(1e5);
        let mut session = session(&mock);

        let config = RunConfig { refractory_width: 0, ..Default::default() };
        let err = session.start(config).unwrap_err();
        assert!(matches!(err, Error::Session(SessionError::InvalidConfig(_))));
        assert!(mock.commands().is_empty());
    }

    #[test]
    fn test_stop_without_start() {
        let mock = MockInstrument::new(1e5);
        let mut session = session(&mock);
        assert!(matches!(
            session.stop(),
            Err(Error::Session(SessionError::NotRunning))
        ));
    }

    #[test]
    fn test_instrument_failure_disarms() {
        let mock = MockInstrument::new(1e5);
        mock.fail_on("STREAMPCKT");
        let mut session = session(&mock);

        let err = session.start(RunConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Instrument(_)));
        assert!(!session.is_active());
        assert_eq!(mock.commands().last().map(String::as_str), Some("STREAM OFF"));
    }

    #[test]
    fn test_stop_disarms_and_restart_works() {
        let mock = MockInstrument::new(1e5);
        let mut session = session(&mock);

        let rate = session.start(RunConfig::default()).unwrap();
        assert_eq!(rate.exponent, 4);
        let port = session.local_addr().unwrap().port();
        assert!(mock.commands().contains(&format!("STREAMPORT {}", port)));

        mock.clear();
        let summary = session.stop().unwrap();
        assert_eq!(mock.commands(), vec!["STREAM OFF"]);
        assert!(summary.passed());
        assert_eq!(summary.packets_received, 0);

        session.start(RunConfig::default()).unwrap();
        session.close().unwrap();
        assert!(mock.is_closed());
    }

    #[test]
    fn test_receiver_fault_is_reported() {
        let mock = MockInstrument::new(1e5);
        let mut session = session(&mock);
        let events = session.events();

        // Connected to a closed port: the first read fails with ICMP unreachable
        let dead = UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let socket = create_socket(&loopback()).unwrap();
        socket.connect(dead).unwrap();
        socket.send(&[0; 4]).unwrap();
        session.start_on(socket, RunConfig::default()).unwrap();

        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(SessionEvent::Fault { message }) => assert!(!message.is_empty()),
            other => panic!("expected a fault, got {:?}", other),
        }
        assert!(!session.is_running());
        assert!(session.is_active());

        let err = session.stop().unwrap_err();
        assert!(matches!(err, Error::Network(NetworkError::ReceiverClosed(_))), "{:?}", err);
        assert_eq!(mock.commands().last().map(String::as_str), Some("STREAM OFF"));
    }

    #[test]
    fn test_fault_evicts_stale_events() {
        let (tx, rx) = bounded(2);
        tx.send(SessionEvent::Detection { count: 1 }).unwrap();
        tx.send(SessionEvent::Detection { count: 2 }).unwrap();

        publish_fault(&tx, &rx, "socket closed".into());

        assert_eq!(rx.try_recv(), Ok(SessionEvent::Detection { count: 2 }));
        assert_eq!(
            rx.try_recv(),
            Ok(SessionEvent::Fault { message: "socket closed".into() })
        );
    }

    #[test]
    fn test_failed_disarm_after_failed_start_is_not_fatal() {
        let mock = MockInstrument::new(1e5);
        mock.fail_on("STREAM");
        let mut session = session(&mock);

        let err = session.start(RunConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Instrument(_)));
        assert!(!session.is_active());
        assert_eq!(mock.commands(), vec!["STREAM OFF", "STREAM OFF"]);
    }
}
