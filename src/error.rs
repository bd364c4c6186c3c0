//! Error types for the remote streaming client

use thiserror::Error;

use crate::protocol::Command;

/// Main error type for the client
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Byte-stream transport errors. All of them end the session.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection closed")]
    Closed,

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid packet size: {0} bytes")]
    InvalidSize(usize),
}

/// Command protocol errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("A waiter for {0:?} is already outstanding")]
    WaiterOutstanding(Command),

    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Connection establishment errors, surfaced to the host as distinct reasons
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Timed out")]
    Timeout,

    #[error("Server busy")]
    Busy,

    #[error("Connection closed")]
    Closed,

    #[error("Connection refused: {0}")]
    Refused(String),
}

/// Challenge-response errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Server requires authentication but no HMAC key is configured")]
    MissingCredential,

    #[error("Invalid HMAC key")]
    InvalidKey,
}

/// Baseband and transmit codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Decompression failed: {0}")]
    Decompress(String),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Frame of {len} bytes exceeds buffer capacity {capacity}")]
    Overflow { len: usize, capacity: usize },

    #[error("Resampler error: {0}")]
    Resampler(String),
}

/// Sample stream hand-off errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Stream stopped")]
    Stopped,

    #[error("Write of {len} items exceeds stream capacity {capacity}")]
    Overflow { len: usize, capacity: usize },
}

/// Result type alias for the client
pub type Result<T> = std::result::Result<T, Error>;
