//! UDP socket construction

use socket2::{Domain, Protocol, Socket, Type};
use std::net::{SocketAddr, UdpSocket};

use crate::config::NetworkConfig;
use crate::error::NetworkError;

/// Create the receive socket described by `config`.
///
/// The socket is bound, has an enlarged receive buffer to ride out
/// scheduling jitter, and a read timeout so the receive loop can observe
/// cancellation.
pub fn create_socket(config: &NetworkConfig) -> Result<UdpSocket, NetworkError> {
    let addr = SocketAddr::new(config.bind_address, config.udp_port);
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| NetworkError::BindFailed(format!("socket: {}", e)))?;

    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::SocketOption(format!("SO_REUSEADDR: {}", e)))?;

    // The OS may clamp this; a smaller buffer only means earlier loss.
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        tracing::warn!("Could not set receive buffer to {} bytes: {}", config.recv_buffer_size, e);
    }

    socket
        .set_read_timeout(Some(config.read_timeout()))
        .map_err(|e| NetworkError::SocketOption(format!("SO_RCVTIMEO: {}", e)))?;

    socket
        .bind(&addr.into())
        .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;

    let socket: UdpSocket = socket.into();
    tracing::info!(
        "UDP socket bound to {}",
        socket.local_addr().map(|a| a.to_string()).unwrap_or_else(|_| addr.to_string())
    );
    Ok(socket)
}
