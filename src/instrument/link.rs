//! Text command transport

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::InstrumentConfig;
use crate::error::InstrumentError;

/// Command/response capability of an instrument control link
pub trait InstrumentLink: Send {
    /// Send a command that produces no response
    fn write(&mut self, command: &str) -> Result<(), InstrumentError>;

    /// Send a query and return its trimmed response line
    fn query(&mut self, command: &str) -> Result<String, InstrumentError>;

    /// Release the link
    fn close(&mut self) -> Result<(), InstrumentError> {
        Ok(())
    }
}

impl<L: InstrumentLink + ?Sized> InstrumentLink for Box<L> {
    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        (**self).write(command)
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        (**self).query(command)
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        (**self).close()
    }
}

/// Newline-terminated commands over a raw TCP socket
pub struct TcpInstrument {
    peer: SocketAddr,
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl TcpInstrument {
    /// Connect using the address, port and timeout of `config`
    pub fn connect(config: &InstrumentConfig) -> Result<Self, InstrumentError> {
        let peer = (config.address.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| InstrumentError::ConnectionFailed(format!("{}: {}", config.address, e)))?
            .next()
            .ok_or_else(|| {
                InstrumentError::ConnectionFailed(format!("{}: no address", config.address))
            })?;
        Self::connect_addr(peer, config.timeout())
    }

    pub fn connect_addr(peer: SocketAddr, timeout: Duration) -> Result<Self, InstrumentError> {
        tracing::info!("Opening control link to {}", peer);
        let stream = TcpStream::connect_timeout(&peer, timeout)
            .map_err(|e| InstrumentError::ConnectionFailed(format!("{}: {}", peer, e)))?;
        stream.set_nodelay(true).map_err(io_error)?;
        stream.set_read_timeout(Some(timeout)).map_err(io_error)?;
        stream.set_write_timeout(Some(timeout)).map_err(io_error)?;

        let writer = stream.try_clone().map_err(io_error)?;
        Ok(Self {
            peer,
            reader: BufReader::new(stream),
            writer,
        })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl InstrumentLink for TcpInstrument {
    fn write(&mut self, command: &str) -> Result<(), InstrumentError> {
        tracing::debug!(peer = %self.peer, "-> {}", command);
        self.writer
            .write_all(format!("{}\n", command).as_bytes())
            .and_then(|_| self.writer.flush())
            .map_err(io_error)
    }

    fn query(&mut self, command: &str) -> Result<String, InstrumentError> {
        self.write(command)?;
        let mut line = String::new();
        let read = self.reader.read_line(&mut line).map_err(io_error)?;
        if read == 0 {
            return Err(InstrumentError::Io("link closed by instrument".into()));
        }
        let response = line.trim().to_string();
        tracing::debug!(peer = %self.peer, "<- {}", response);
        Ok(response)
    }

    fn close(&mut self) -> Result<(), InstrumentError> {
        tracing::info!("Closing control link to {}", self.peer);
        match self.writer.shutdown(std::net::Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }
}

fn io_error(err: std::io::Error) -> InstrumentError {
    InstrumentError::Io(err.to_string())
}
