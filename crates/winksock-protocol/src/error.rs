//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding winksock data
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Length field smaller than the frame header
    #[error("Invalid frame length: {0}")]
    InvalidLength(u16),

    /// Unknown opcode in the control byte
    #[error("Unknown opcode: {0}")]
    UnknownOpcode(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Incomplete frame received
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    IncompleteFrame { expected: usize, actual: usize },

    /// Malformed handshake response
    #[error("Bad handshake: {0}")]
    BadHandshake(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
