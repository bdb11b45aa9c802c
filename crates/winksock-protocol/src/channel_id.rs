//! Channel identifier type

use std::fmt;

/// Numeric identifier of a channel on a shared connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u32);

impl ChannelId {
    /// Create a new channel ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }

    /// Whether this is the broadcast id
    pub fn is_broadcast(&self) -> bool {
        self.0 == 0
    }

    /// Frames addressed to every open channel on a connection
    pub const BROADCAST: ChannelId = ChannelId(0);
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

impl From<u32> for ChannelId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_display() {
        let id = ChannelId::new(42);
        assert_eq!(format!("{}", id), "channel-42");
    }

    #[test]
    fn test_broadcast() {
        assert!(ChannelId::BROADCAST.is_broadcast());
        assert!(!ChannelId::new(1).is_broadcast());
        assert_eq!(ChannelId::from(0), ChannelId::BROADCAST);
    }
}
