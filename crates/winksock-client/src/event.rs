//! Inbound channel events

use bytes::Bytes;
use winksock_protocol::frame;

/// A DATA payload delivered to a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelData {
    priority: u8,
    text: bool,
    payload: Bytes,
}

impl ChannelData {
    pub fn new(priority: u8, text: bool, payload: Bytes) -> Self {
        Self {
            priority,
            text,
            payload,
        }
    }

    /// Build from a DATA frame's flag and payload
    pub fn from_flag(flag: u8, payload: Bytes) -> Self {
        let (priority, text) = frame::split_data_flag(flag);
        Self::new(priority, text, payload)
    }

    pub fn priority(&self) -> u8 {
        self.priority
    }

    pub fn is_text(&self) -> bool {
        self.text
    }

    pub fn is_binary(&self) -> bool {
        !self.text
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload as UTF-8 if it was sent as text and decodes cleanly
    pub fn as_str(&self) -> Option<&str> {
        if !self.text {
            return None;
        }
        std::str::from_utf8(&self.payload).ok()
    }
}

/// A SIGNAL payload delivered to a channel
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChannelSignal {
    payload: Bytes,
}

impl ChannelSignal {
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload decoded as UTF-8, replacing invalid sequences
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Either kind of inbound payload, as returned by `Channel::next_event`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Data(ChannelData),
    Signal(ChannelSignal),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_from_flag() {
        let data = ChannelData::from_flag(frame::data_flag(3, true), Bytes::from("héllo"));
        assert_eq!(data.priority(), 3);
        assert!(data.is_text());
        assert_eq!(data.as_str(), Some("héllo"));
    }

    #[test]
    fn test_binary_data_has_no_str() {
        let data = ChannelData::from_flag(frame::data_flag(0, false), Bytes::from("raw"));
        assert!(data.is_binary());
        assert_eq!(data.as_str(), None);
        assert_eq!(data.into_payload(), Bytes::from("raw"));
    }

    #[test]
    fn test_signal_text() {
        let signal = ChannelSignal::new(Bytes::from_static(b"bye\xff"));
        assert_eq!(signal.to_text(), "bye\u{FFFD}");
    }
}
