//! Channel permission modes

use std::fmt;

/// Permission bits requested when opening a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ChannelMode(u8);

impl ChannelMode {
    /// No permissions (not accepted by numeric-id endpoints)
    pub const LISTEN: ChannelMode = ChannelMode(0x0);
    pub const READ: ChannelMode = ChannelMode(0x1);
    pub const WRITE: ChannelMode = ChannelMode(0x2);
    pub const READWRITE: ChannelMode = ChannelMode(0x3);
    /// Emit alone (not accepted by numeric-id endpoints)
    pub const EMIT: ChannelMode = ChannelMode(0x4);
    pub const READEMIT: ChannelMode = ChannelMode(0x5);
    pub const WRITEEMIT: ChannelMode = ChannelMode(0x6);
    pub const READWRITEEMIT: ChannelMode = ChannelMode(0x7);

    /// Wrap raw mode bits without validation
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw mode bits
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Whether this mode may be requested from a numeric-id endpoint
    pub fn is_valid(&self) -> bool {
        matches!(self.0, 0x1..=0x7) && self.0 != Self::EMIT.0
    }

    pub fn can_read(&self) -> bool {
        self.0 & Self::READ.0 != 0
    }

    pub fn can_write(&self) -> bool {
        self.0 & Self::WRITE.0 != 0
    }

    pub fn can_emit(&self) -> bool {
        self.0 & Self::EMIT.0 != 0
    }

    /// Parse a mode name such as `readwrite` or `r+w+e`
    pub fn from_name(name: &str) -> Option<Self> {
        let mode = match name.to_ascii_lowercase().as_str() {
            "listen" => Self::LISTEN,
            "read" | "r" => Self::READ,
            "write" | "w" => Self::WRITE,
            "readwrite" | "rw" | "r+w" => Self::READWRITE,
            "emit" | "e" => Self::EMIT,
            "reademit" | "re" | "r+e" => Self::READEMIT,
            "writeemit" | "we" | "w+e" => Self::WRITEEMIT,
            "readwriteemit" | "rwe" | "r+w+e" => Self::READWRITEEMIT,
            _ => return None,
        };
        Some(mode)
    }
}

impl std::ops::BitOr for ChannelMode {
    type Output = ChannelMode;

    fn bitor(self, rhs: Self) -> Self::Output {
        ChannelMode(self.0 | rhs.0)
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "listen");
        }

        let mut parts = Vec::with_capacity(3);
        if self.can_read() {
            parts.push("read");
        }
        if self.can_write() {
            parts.push("write");
        }
        if self.can_emit() {
            parts.push("emit");
        }
        write!(f, "{}", parts.join("+"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_modes() {
        let valid: Vec<u8> = (0u8..=0xFF)
            .filter(|bits| ChannelMode::from_bits(*bits).is_valid())
            .collect();
        assert_eq!(valid, vec![1, 2, 3, 5, 6, 7]);
    }

    #[test]
    fn test_combination() {
        assert_eq!(ChannelMode::READ | ChannelMode::WRITE, ChannelMode::READWRITE);
        assert_eq!(
            ChannelMode::READWRITE | ChannelMode::EMIT,
            ChannelMode::READWRITEEMIT
        );
    }

    #[test]
    fn test_permission_bits() {
        let mode = ChannelMode::WRITEEMIT;
        assert!(!mode.can_read());
        assert!(mode.can_write());
        assert!(mode.can_emit());
    }

    #[test]
    fn test_names() {
        assert_eq!(ChannelMode::from_name("rw"), Some(ChannelMode::READWRITE));
        assert_eq!(ChannelMode::from_name("ReadEmit"), Some(ChannelMode::READEMIT));
        assert_eq!(ChannelMode::from_name("bogus"), None);
        assert_eq!(ChannelMode::READWRITEEMIT.to_string(), "read+write+emit");
        assert_eq!(ChannelMode::LISTEN.to_string(), "listen");
    }
}
