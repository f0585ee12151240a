//! Error types shared across the server.

use thiserror::Error;

/// Errors that can occur while framing a message on the wire.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed the connection before any bytes of the length
    /// prefix were read. Not an error condition by itself — callers
    /// treat this as "no more messages on this connection".
    #[error("peer closed connection")]
    Closed,

    /// The stream ended in the middle of a frame (after the length
    /// prefix, or partway through the payload).
    #[error("connection closed mid-frame")]
    Truncated,

    /// The declared frame length exceeds the protocol's sanity cap.
    #[error("frame length {0} exceeds maximum of {1} bytes")]
    TooLarge(u32, u32),

    /// A transport-level I/O error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while parsing a decoded frame into a request.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not valid UTF-8.
    #[error("payload is not valid utf-8")]
    InvalidUtf8,

    /// A bet record did not split into exactly six `|`-separated fields.
    #[error("expected 6 fields in bet record, found {0}")]
    WrongFieldCount(usize),
}

/// Errors that can occur while constructing a [`crate::bet::Bet`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BetValidationError {
    /// One of the string fields was empty.
    #[error("field '{0}' must not be empty")]
    EmptyField(&'static str),

    /// The agency field did not parse as a positive integer.
    #[error("agency must be a positive integer, got '{0}'")]
    InvalidAgency(String),

    /// The number field did not parse as an integer.
    #[error("number must be an integer, got '{0}'")]
    InvalidNumber(String),
}

/// Errors surfaced by the bet store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure while appending or loading bets.
    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The on-disk representation of a bet was corrupt.
    #[error("storage csv error: {0}")]
    Csv(#[from] csv::Error),
}

/// Errors surfaced while loading server configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The number of agencies must be at least one.
    #[error("agencies must be >= 1, got {0}")]
    ZeroAgencies(u32),
}
