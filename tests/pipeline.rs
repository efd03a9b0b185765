//! End-to-end pipeline tests over loopback UDP

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use lockin_stream::codec::{DropRecord, PacketEncoder};
use lockin_stream::config::{NetworkConfig, PipelineConfig, RunConfig};
use lockin_stream::instrument::MockInstrument;
use lockin_stream::protocol::{ChannelSelection, PacketLength, SampleFormat};
use lockin_stream::session::{SessionEvent, StreamSession};

fn start_session(config: RunConfig) -> (StreamSession, MockInstrument, SocketAddr) {
    let mock = MockInstrument::new(1e5);
    let network = NetworkConfig {
        bind_address: IpAddr::from([127, 0, 0, 1]),
        udp_port: 0,
        read_timeout_ms: 10,
        ..Default::default()
    };
    let mut session = StreamSession::new(Box::new(mock.clone()), network, PipelineConfig::default());
    session.start(config).expect("session starts");
    let addr = session.local_addr().expect("bound address");
    (session, mock, addr)
}

fn send_all(target: SocketAddr, datagrams: &[bytes::Bytes]) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    for datagram in datagrams {
        socket.send_to(datagram, target).unwrap();
    }
}

/// Wait until the decoder has seen `packets` datagrams
fn wait_for_packets(session: &StreamSession, packets: u64) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while session.drop_stats().packets_seen < packets {
        assert!(Instant::now() < deadline, "timed out waiting for {} packets", packets);
        thread::sleep(Duration::from_millis(5));
    }
}

fn sequenced(encoder: &mut PacketEncoder, sequences: &[u8], values: &[f64]) -> Vec<bytes::Bytes> {
    sequences
        .iter()
        .map(|&seq| {
            encoder.set_sequence(seq);
            encoder.encode(values)
        })
        .collect()
}

#[test]
fn contiguous_sequence_has_no_drops() {
    let config = RunConfig::default();
    let mut encoder = PacketEncoder::for_run(&config);
    let (mut session, _mock, addr) = start_session(config);

    send_all(addr, &sequenced(&mut encoder, &[0, 1, 2, 3], &[]));
    wait_for_packets(&session, 4);

    let summary = session.stop().unwrap();
    assert!(summary.passed());
    assert_eq!(summary.drops.total_dropped, 0);
    assert_eq!(summary.packets_received, 4);
    assert_eq!(summary.samples_per_channel, 4 * 512);
}

#[test]
fn skipped_counter_is_one_drop() {
    let config = RunConfig::default();
    let mut encoder = PacketEncoder::for_run(&config);
    let (mut session, _mock, addr) = start_session(config);

    send_all(addr, &sequenced(&mut encoder, &[5, 7], &[]));
    wait_for_packets(&session, 2);

    let summary = session.stop().unwrap();
    assert!(!summary.passed());
    assert_eq!(summary.drops.total_dropped, 1);
    assert_eq!(summary.drops.gaps, vec![DropRecord { gap: 1, position: 1 }]);
}

#[test]
fn wraparound_is_not_a_drop() {
    let config = RunConfig { packet_length: PacketLength::Bytes128, ..Default::default() };
    let mut encoder = PacketEncoder::for_run(&config);
    let (mut session, _mock, addr) = start_session(config);

    send_all(addr, &sequenced(&mut encoder, &[254, 255, 0, 1], &[]));
    wait_for_packets(&session, 4);

    assert_eq!(session.stop().unwrap().drops.total_dropped, 0);
}

#[test]
fn single_pulse_counts_once() {
    let config = RunConfig { threshold: 1.0, refractory_width: 3, ..Default::default() };
    let mut encoder = PacketEncoder::for_run(&config);
    let (mut session, _mock, addr) = start_session(config);
    let events = session.events();

    send_all(addr, &[encoder.encode(&[0.0, 2.0, 5.0, 3.0, -1.0, 0.0])]);
    assert_eq!(
        events.recv_timeout(Duration::from_secs(5)),
        Ok(SessionEvent::Detection { count: 1 })
    );

    let summary = session.stop().unwrap();
    assert_eq!(summary.detections, 1);
    assert_eq!(session.detection_count(), 1);
}

#[test]
fn pulses_on_selected_channel_across_packets() {
    let config = RunConfig {
        channels: ChannelSelection::XY,
        packet_length: PacketLength::Bytes128,
        format: SampleFormat::Float32,
        threshold: 0.5,
        refractory_width: 8,
        detect_channel: 1,
        ..Default::default()
    };
    let mut encoder = PacketEncoder::for_run(&config);
    let per_packet = config.samples_per_packet();
    let (mut session, _mock, addr) = start_session(config);

    // Y carries a pulse every 16 samples; X stays above threshold
    let y: Vec<f64> = (0..per_packet * 4)
        .map(|i| if i % 16 == 3 || i % 16 == 4 { 1.0 } else { 0.0 })
        .collect();
    let datagrams: Vec<_> = y
        .chunks(per_packet)
        .map(|chunk| {
            let interleaved: Vec<f64> = chunk.iter().flat_map(|&v| [5.0, v]).collect();
            encoder.encode(&interleaved)
        })
        .collect();
    send_all(addr, &datagrams);
    wait_for_packets(&session, datagrams.len() as u64);

    let summary = session.stop().unwrap();
    assert_eq!(summary.detections, (per_packet * 4 / 16) as u64);
    assert_eq!(summary.samples_per_channel, (per_packet * 4) as u64);
}

#[test]
fn malformed_datagrams_are_counted_not_forwarded() {
    let config = RunConfig { threshold: 1.0, refractory_width: 3, ..Default::default() };
    let mut encoder = PacketEncoder::for_run(&config);
    let (mut session, _mock, addr) = start_session(config);

    let mut datagrams = sequenced(&mut encoder, &[0], &[]);
    // Short datagram with a pulse that must not be detected
    let mut short = vec![0, 0, 0, 1];
    for v in [0i16, 5, -5] {
        short.extend_from_slice(&v.to_be_bytes());
    }
    datagrams.push(short.into());
    datagrams.extend(sequenced(&mut encoder, &[2], &[]));
    send_all(addr, &datagrams);
    wait_for_packets(&session, 3);

    let summary = session.stop().unwrap();
    assert_eq!(summary.drops.decode_errors, 1);
    assert_eq!(summary.drops.total_dropped, 0);
    assert_eq!(summary.detections, 0);
}

#[test]
fn instrument_is_configured_then_disarmed() {
    let config = RunConfig { channels: ChannelSelection::RT, ..Default::default() };
    let (mut session, mock, addr) = start_session(config);
    session.stop().unwrap();

    let commands = mock.commands();
    assert_eq!(commands.first().map(String::as_str), Some("STREAM OFF"));
    assert!(commands.contains(&"STREAMCH RT".to_string()));
    assert!(commands.contains(&format!("STREAMPORT {}", addr.port())));
    let on = commands.iter().position(|c| c == "STREAM ON").unwrap();
    assert_eq!(commands[on + 1..], ["STREAM OFF".to_string()]);
}
