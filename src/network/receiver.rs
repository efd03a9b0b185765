//! UDP receive loop
//!
//! Reads fixed-size datagrams from the socket and forwards them over a
//! bounded channel. A full channel blocks the loop, leaving the socket
//! buffer to absorb (or drop) the overflow.

use bytes::Bytes;
use crossbeam_channel::{SendTimeoutError, Sender};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::MAX_DATAGRAM_SIZE;
use crate::error::NetworkError;

/// A datagram as received, cut to the expected size
#[derive(Debug, Clone)]
pub struct RawDatagram {
    /// Arrival index within the run
    pub index: u64,
    pub payload: Bytes,
}

/// Receive counters shared with the session
#[derive(Debug, Default)]
pub struct ReceiverCounters {
    datagrams: AtomicU64,
    bytes: AtomicU64,
    oversized: AtomicU64,
}

impl ReceiverCounters {
    pub fn snapshot(&self) -> ReceiverStats {
        ReceiverStats {
            datagrams: self.datagrams.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
        }
    }
}

/// Receiver statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub datagrams: u64,
    pub bytes: u64,
    /// Datagrams longer than expected, truncated before forwarding
    pub oversized: u64,
}

/// Socket ingestion stage
pub struct SocketReceiver {
    socket: UdpSocket,
    expected_len: usize,
    output: Sender<RawDatagram>,
    running: Arc<AtomicBool>,
    counters: Arc<ReceiverCounters>,
    /// How long a blocked send waits before re-checking `running`
    poll_interval: Duration,
}

impl SocketReceiver {
    pub fn new(
        socket: UdpSocket,
        expected_len: usize,
        output: Sender<RawDatagram>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let poll_interval = socket
            .read_timeout()
            .ok()
            .flatten()
            .unwrap_or(Duration::from_millis(50));
        Self {
            socket,
            expected_len,
            output,
            running,
            counters: Arc::new(ReceiverCounters::default()),
            poll_interval,
        }
    }

    pub fn counters(&self) -> Arc<ReceiverCounters> {
        self.counters.clone()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    /// Run until `running` is cleared, the consumer hangs up, or the
    /// socket fails. A socket failure clears `running` and is returned.
    pub fn run(self) -> Result<(), NetworkError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE.max(self.expected_len)];
        let mut index = 0u64;

        tracing::debug!("Receiver started, expecting {} byte datagrams", self.expected_len);

        while self.running.load(Ordering::Acquire) {
            let received = match self.socket.recv_from(&mut buf) {
                Ok((n, _src)) => n,
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    tracing::error!("UDP receive failed: {}", e);
                    self.running.store(false, Ordering::Release);
                    return Err(NetworkError::ReceiverClosed(e.to_string()));
                }
            };

            let len = received.min(self.expected_len);
            if received > self.expected_len {
                self.counters.oversized.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    "Truncated {} byte datagram to {} bytes",
                    received,
                    self.expected_len
                );
            }
            self.counters.datagrams.fetch_add(1, Ordering::Relaxed);
            self.counters.bytes.fetch_add(received as u64, Ordering::Relaxed);

            let datagram = RawDatagram {
                index,
                payload: Bytes::copy_from_slice(&buf[..len]),
            };
            index += 1;

            if !self.forward(datagram) {
                break;
            }
        }

        tracing::debug!("Receiver stopped after {} datagrams", index);
        Ok(())
    }

    /// Blocking send that still observes cancellation. Returns false when
    /// the loop should exit.
    fn forward(&self, datagram: RawDatagram) -> bool {
        let mut pending = datagram;
        loop {
            match self.output.send_timeout(pending, self.poll_interval) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(d)) => {
                    if !self.running.load(Ordering::Acquire) {
                        return false;
                    }
                    pending = d;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    tracing::debug!("Decoder hung up, receiver exiting");
                    return false;
                }
            }
        }
    }
}
