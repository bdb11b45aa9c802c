//! winksock-protocol: Wire protocol for winksock channel multiplexing
//!
//! This crate defines the binary frame format and the plaintext upgrade
//! handshake spoken between a winksock client and an endpoint.

pub mod channel_id;
pub mod codec;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mode;

pub use channel_id::ChannelId;
pub use codec::{Frame, FrameCodec};
pub use error::ProtocolError;
pub use frame::{
    open_flag, signal_flag, FrameHeader, Opcode, HEADER_SIZE, MAX_PAYLOAD_SIZE, MAX_PRIORITY,
};
pub use handshake::{
    HandshakeCodec, HandshakeOutcome, HandshakeRequest, HandshakeResponse, PROTOCOL_VERSION,
};
pub use mode::ChannelMode;
