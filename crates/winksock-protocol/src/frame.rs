//! Frame header encoding/decoding
//!
//! The frame format uses a 7-byte header:
//! - length: 2 bytes (u16, big-endian, total frame size including the header)
//! - channel_id: 4 bytes (u32, big-endian, 0 addresses every open channel)
//! - control: 1 byte (`opcode << 3 | flag`)

use bytes::{Buf, BufMut, BytesMut};

use crate::channel_id::ChannelId;
use crate::error::ProtocolError;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 7;

/// Maximum payload size this client will send (10 KiB)
pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024;

/// Largest payload the 16-bit length field can describe
pub const MAX_WIRE_PAYLOAD_SIZE: usize = u16::MAX as usize - HEADER_SIZE;

const OP_BITPOS: u8 = 3;
const OP_BITMASK: u8 = 0x07;
const FLAG_BITMASK: u8 = 0x07;

/// Flags carried by OPEN frames
pub mod open_flag {
    /// Open granted under the requested id
    pub const ALLOW: u8 = 0x0;
    /// Open granted under the id carried in the payload
    pub const REDIRECT: u8 = 0x1;
    /// Open denied
    pub const DENY: u8 = 0x7;
}

/// Flags carried by SIGNAL frames
pub mod signal_flag {
    /// Plain signal
    pub const EMIT: u8 = 0x0;
    /// Channel end
    pub const END: u8 = 0x1;
    /// Channel ended with an error
    pub const ERROR: u8 = 0x7;
}

/// Highest priority a DATA frame can carry
pub const MAX_PRIORITY: u8 = 3;

/// Pack a priority and content type into a DATA flag
pub fn data_flag(priority: u8, text: bool) -> u8 {
    ((priority & MAX_PRIORITY) << 1) | u8::from(text)
}

/// Split a DATA flag into `(priority, text)`
pub fn split_data_flag(flag: u8) -> (u8, bool) {
    ((flag >> 1) & MAX_PRIORITY, flag & 1 == 1)
}

/// Frame operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Noop = 0x00,
    Open = 0x01,
    Data = 0x02,
    Signal = 0x03,
}

impl Opcode {
    /// Parse an opcode from its 3-bit wire value
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Noop),
            0x01 => Some(Self::Open),
            0x02 => Some(Self::Data),
            0x03 => Some(Self::Signal),
            _ => None,
        }
    }

    /// Wire value
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Frame header containing routing and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame length including this header
    pub length: u16,
    /// Channel this frame belongs to
    pub channel_id: ChannelId,
    /// Operation
    pub opcode: Opcode,
    /// Opcode-specific flag (3 bits)
    pub flag: u8,
}

impl FrameHeader {
    /// Create a header for a payload of the given size
    pub fn new(
        channel_id: ChannelId,
        opcode: Opcode,
        flag: u8,
        payload_length: usize,
    ) -> Result<Self, ProtocolError> {
        if payload_length > MAX_WIRE_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_length,
                max: MAX_WIRE_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            length: (HEADER_SIZE + payload_length) as u16,
            channel_id,
            opcode,
            flag: flag & FLAG_BITMASK,
        })
    }

    /// Number of payload bytes following the header
    pub fn payload_length(&self) -> usize {
        self.length as usize - HEADER_SIZE
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u16(self.length);
        dst.put_u32(self.channel_id.as_u32());
        dst.put_u8((self.opcode.as_u8() << OP_BITPOS) | self.flag);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the header is invalid (short length or unknown opcode).
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Validate before consuming anything
        let length = u16::from_be_bytes([src[0], src[1]]);
        if (length as usize) < HEADER_SIZE {
            return Err(ProtocolError::InvalidLength(length));
        }

        let control = src[6];
        let op = (control >> OP_BITPOS) & OP_BITMASK;
        let opcode = Opcode::from_u8(op).ok_or(ProtocolError::UnknownOpcode(op))?;

        let _ = src.get_u16();
        let channel_id = ChannelId::new(src.get_u32());
        let _ = src.get_u8();

        Ok(Some(Self {
            length,
            channel_id,
            opcode,
            flag: control & FLAG_BITMASK,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(ChannelId::new(42), Opcode::Data, 3, 1234).unwrap();

        let mut buf = BytesMut::with_capacity(HEADER_SIZE);
        header.encode(&mut buf);

        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.payload_length(), 1234);
    }

    #[test]
    fn test_header_wire_layout() {
        let header = FrameHeader::new(ChannelId::new(1), Opcode::Signal, signal_flag::END, 0).unwrap();

        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        assert_eq!(&buf[..], &[0x00, 0x07, 0, 0, 0, 1, (3 << 3) | 1]);
    }

    #[test]
    fn test_insufficient_bytes() {
        let mut buf = BytesMut::from(&[0u8; 4][..]);
        let result = FrameHeader::decode(&mut buf).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_length_shorter_than_header() {
        let mut buf = BytesMut::from(&[0, 3, 0, 0, 0, 1, 0x10][..]);
        let result = FrameHeader::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::InvalidLength(3))));
    }

    #[test]
    fn test_unknown_opcode() {
        // opcode 4 (RESOLVE) belongs to the path-addressing variant
        let mut buf = BytesMut::from(&[0, 7, 0, 0, 0, 1, 4 << 3][..]);
        let result = FrameHeader::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::UnknownOpcode(4))));
    }

    #[test]
    fn test_data_flag_packing() {
        assert_eq!(data_flag(0, true), 1);
        assert_eq!(data_flag(3, false), 6);
        assert_eq!(split_data_flag(data_flag(2, true)), (2, true));
        assert_eq!(split_data_flag(0), (0, false));
    }
}
