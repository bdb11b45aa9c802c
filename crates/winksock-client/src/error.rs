//! Error types for winksock channels and configuration

use std::path::PathBuf;

use thiserror::Error;
use winksock_protocol::ProtocolError;

/// Errors surfaced by channel operations
///
/// Cloneable so one transport failure can be delivered to every channel
/// multiplexed on the connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Address could not be parsed
    #[error("Invalid address: {0}")]
    Address(String),

    /// Mode bits outside the accepted combinations
    #[error("Invalid channel mode: {0:#x}")]
    Mode(u8),

    /// `connect` called on a channel that already has a connection
    #[error("Channel is already connected")]
    AlreadyConnected,

    /// Address names a protocol other than plain http
    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    /// Socket, resolution or handshake failure
    #[error("Connect error: {0}")]
    Connect(String),

    /// Wire protocol violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The server refused to open the channel
    #[error("Open denied ({code}): {message}")]
    OpenDenied { code: u8, message: String },

    /// The server ended the channel with an error signal
    #[error("Signal error ({code}): {message}")]
    Signal { code: u8, message: String },

    /// Socket transfer failed
    #[error("I/O error: {0}")]
    Io(String),

    /// Another channel already holds this id on the connection
    #[error("Channel already open")]
    AlreadyOpen,

    /// Operation requires an open channel
    #[error("Channel is not connected")]
    NotConnected,

    /// Mode does not grant the operation
    #[error("Permission denied: {0}")]
    PermissionDenied(&'static str),

    /// DATA priority outside 0..=max
    #[error("Priority must be between 0 and {max}, got {priority}")]
    InvalidPriority { priority: u8, max: u8 },
}

impl ChannelError {
    /// Server-supplied code, for denials and signal errors
    pub fn code(&self) -> Option<u8> {
        match self {
            Self::OpenDenied { code, .. } | Self::Signal { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Whether this error came from the transport rather than the channel
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::Protocol(_) | Self::Io(_))
    }

    pub(crate) fn connection_closed() -> Self {
        Self::Io("connection closed".to_string())
    }
}

impl From<ProtocolError> for ChannelError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Io(e) => Self::Io(e.to_string()),
            ProtocolError::BadHandshake(msg) => Self::Connect(format!("bad handshake: {}", msg)),
            other => Self::Protocol(other.to_string()),
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_conversion() {
        let err: ChannelError = ProtocolError::UnknownOpcode(5).into();
        assert_eq!(err, ChannelError::Protocol("Unknown opcode: 5".to_string()));

        let err: ChannelError = ProtocolError::BadHandshake("nope".to_string()).into();
        assert!(matches!(err, ChannelError::Connect(_)));

        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "broken");
        let err: ChannelError = ProtocolError::Io(io).into();
        assert!(matches!(err, ChannelError::Io(_)));
        assert!(err.is_transport());
    }

    #[test]
    fn test_codes() {
        let denied = ChannelError::OpenDenied {
            code: 7,
            message: "nope".to_string(),
        };
        assert_eq!(denied.code(), Some(7));
        assert_eq!(denied.to_string(), "Open denied (7): nope");
        assert_eq!(ChannelError::AlreadyOpen.code(), None);
    }
}
