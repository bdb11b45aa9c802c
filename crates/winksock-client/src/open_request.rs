//! Outstanding OPEN requests

use winksock_protocol::{ChannelId, Frame};

use crate::channel::Channel;

/// An OPEN the connection has accepted but the server has not answered
pub(crate) struct OpenRequest {
    pub channel: Channel,
    pub channel_id: ChannelId,
    pub frame: Frame,
    /// Whether the OPEN frame has been handed to the writer
    pub sent: bool,
    /// Registration order on the connection, used when flushing after the handshake
    pub order: u64,
}

impl OpenRequest {
    pub fn new(channel: Channel, channel_id: ChannelId, frame: Frame) -> Self {
        Self {
            channel,
            channel_id,
            frame,
            sent: false,
            order: 0,
        }
    }

    /// Whether this request was issued by `channel`
    pub fn belongs_to(&self, channel: &Channel) -> bool {
        self.channel.ptr_eq(channel)
    }
}

/// Where a request ended up once the connection accepted it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// Written to the socket
    Sent,
    /// Waiting for the handshake
    Deferred,
    /// Behind another request for the same id
    Queued,
}
