//! Error types for termscript.
//!
//! Timeouts are not errors here: a bounded wait that expires yields an
//! absent result (`Ok(None)`). The variants below cover the faults that
//! cannot be expressed that way.

use std::io;
use thiserror::Error;

/// Main error type for termscript operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Character capture and queue errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Session-level errors (configuration, composition)
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Failures raised by the byte transfer protocol
    #[error("Transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// I/O error on a local file or the side channel
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transcript or configuration (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Channel layer errors (capture task, queue, duplex stream).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The capture task ended and every captured unit was consumed
    #[error("Input stream closed")]
    Closed,

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Write or flush on the output stream failed
    #[error("Stream I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Session layer errors.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Invalid configuration in the session builder or config file
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

/// Byte transfer protocol errors.
///
/// The transfer adapter never interprets these; they reach the caller
/// exactly as the protocol raised them.
#[derive(Error, Debug)]
pub enum TransferError {
    /// The peer aborted the transfer with CAN
    #[error("Transfer cancelled by peer")]
    Cancelled,

    /// A protocol stage ran out of retries
    #[error("No valid response during {stage} after {retries} retries")]
    RetriesExceeded { stage: &'static str, retries: u32 },

    /// A byte that has no meaning in the current protocol state
    #[error("Unexpected byte {0:#04x}")]
    UnexpectedByte(u8),

    /// The peer stopped sending within the protocol timeout
    #[error("Peer timed out")]
    Timeout,
}

/// Result type alias using termscript's Error.
pub type Result<T> = std::result::Result<T, Error>;
