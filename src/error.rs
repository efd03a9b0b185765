//! Error types for the streaming pipeline

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Instrument error: {0}")]
    Instrument(#[from] InstrumentError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// UDP socket errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Socket bind failed: {0}")]
    BindFailed(String),

    #[error("Socket option failed: {0}")]
    SocketOption(String),

    /// The receive socket errored or closed mid-run. Terminal for the run.
    #[error("Receiver closed: {0}")]
    ReceiverClosed(String),
}

/// Datagram decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Datagram of {0} bytes has no complete header")]
    MissingHeader(usize),

    #[error("Datagram truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Payload of {len} bytes is not a multiple of {element_size}")]
    Misaligned { len: usize, element_size: usize },
}

/// Instrument control link errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InstrumentError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Link IO failed: {0}")]
    Io(String),

    #[error("Invalid response to {command:?}: {response:?}")]
    InvalidResponse { command: String, response: String },
}

/// Session lifecycle and usage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session is already running")]
    AlreadyRunning,

    #[error("Session is not running")]
    NotRunning,

    #[error("Invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("Pipeline stage {0} panicked")]
    StagePanicked(&'static str),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(err: toml::ser::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
