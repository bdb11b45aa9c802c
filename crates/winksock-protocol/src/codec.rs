//! Tokio codec for winksock frames

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::channel_id::ChannelId;
use crate::error::ProtocolError;
use crate::frame::{self, signal_flag, FrameHeader, Opcode, MAX_PAYLOAD_SIZE};
use crate::mode::ChannelMode;

/// A complete frame with header fields and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Channel this frame belongs to
    pub channel_id: ChannelId,
    /// Operation
    pub opcode: Opcode,
    /// Opcode-specific flag
    pub flag: u8,
    /// Payload bytes (possibly empty)
    pub payload: Bytes,
}

impl Frame {
    /// Create a new outbound frame
    ///
    /// Fails if the payload exceeds [`MAX_PAYLOAD_SIZE`].
    pub fn new(
        channel_id: ChannelId,
        opcode: Opcode,
        flag: u8,
        payload: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        let payload = payload.into();
        check_payload(payload.len())?;

        Ok(Self {
            channel_id,
            opcode,
            flag,
            payload,
        })
    }

    /// OPEN request for `channel_id` with the requested mode and optional token
    pub fn open(
        channel_id: ChannelId,
        mode: ChannelMode,
        token: Option<Bytes>,
    ) -> Result<Self, ProtocolError> {
        Self::new(
            channel_id,
            Opcode::Open,
            mode.bits(),
            token.unwrap_or_default(),
        )
    }

    /// DATA frame
    pub fn data(
        channel_id: ChannelId,
        priority: u8,
        text: bool,
        payload: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        Self::new(
            channel_id,
            Opcode::Data,
            frame::data_flag(priority, text),
            payload,
        )
    }

    /// SIGNAL frame with the given signal flag
    pub fn signal(
        channel_id: ChannelId,
        flag: u8,
        payload: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        Self::new(channel_id, Opcode::Signal, flag, payload)
    }

    /// SIGNAL/END frame
    pub fn end(channel_id: ChannelId, payload: Option<Bytes>) -> Result<Self, ProtocolError> {
        Self::signal(channel_id, signal_flag::END, payload.unwrap_or_default())
    }

    /// Same frame readdressed to another channel
    pub fn with_channel_id(mut self, channel_id: ChannelId) -> Self {
        self.channel_id = channel_id;
        self
    }

    /// Encode the frame into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        check_payload(self.payload.len())?;

        let header = FrameHeader::new(self.channel_id, self.opcode, self.flag, self.payload.len())?;
        dst.reserve(header.length as usize);
        header.encode(dst);
        dst.extend_from_slice(&self.payload);

        Ok(())
    }

    /// Encode the frame into a standalone buffer
    pub fn to_bytes(&self) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode exactly one frame from a complete buffer
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = BytesMut::from(bytes);
        let mut codec = FrameCodec::new();

        match codec.decode(&mut buf)? {
            Some(frame) if buf.is_empty() => Ok(frame),
            Some(frame) => Err(ProtocolError::IncompleteFrame {
                expected: frame.payload.len() + crate::frame::HEADER_SIZE,
                actual: bytes.len(),
            }),
            None => Err(ProtocolError::IncompleteFrame {
                expected: expected_length(bytes),
                actual: bytes.len(),
            }),
        }
    }
}

fn check_payload(size: usize) -> Result<(), ProtocolError> {
    if size > MAX_PAYLOAD_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size,
            max: MAX_PAYLOAD_SIZE,
        });
    }
    Ok(())
}

fn expected_length(bytes: &[u8]) -> usize {
    match bytes {
        [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]) as usize,
        _ => crate::frame::HEADER_SIZE,
    }
}

/// Codec for encoding/decoding winksock frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None),
            },
        };

        let payload_len = header.payload_length();
        if src.len() < payload_len {
            // Save header and wait for more data
            src.reserve(payload_len - src.len());
            self.pending_header = Some(header);
            return Ok(None);
        }

        let payload = src.split_to(payload_len).freeze();

        Ok(Some(Frame {
            channel_id: header.channel_id,
            opcode: header.opcode,
            flag: header.flag,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        frame.encode(dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{open_flag, HEADER_SIZE};

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = FrameCodec::new();

        let frame = Frame::data(ChannelId::new(1), 2, true, Bytes::from("ping")).unwrap();

        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE + 4);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(frame::split_data_flag(decoded.flag), (2, true));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_roundtrip_at_payload_limit() {
        let payload = Bytes::from(vec![0xAB; MAX_PAYLOAD_SIZE]);
        let frame = Frame::signal(ChannelId::new(0xDEAD_BEEF), signal_flag::EMIT, payload).unwrap();

        let bytes = frame.to_bytes().unwrap();
        assert_eq!(Frame::from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let frame = Frame::end(ChannelId::new(9), None).unwrap();
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(Frame::from_bytes(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]);
        let result = Frame::data(ChannelId::new(1), 0, false, payload);
        assert!(matches!(
            result,
            Err(ProtocolError::PayloadTooLarge { size, max })
                if size == MAX_PAYLOAD_SIZE + 1 && max == MAX_PAYLOAD_SIZE
        ));
    }

    #[test]
    fn test_encoder_rejects_oversized_frame() {
        let frame = Frame {
            channel_id: ChannelId::new(1),
            opcode: Opcode::Data,
            flag: 0,
            payload: Bytes::from(vec![0u8; MAX_PAYLOAD_SIZE + 1]),
        };

        let mut buf = BytesMut::new();
        let result = FrameCodec::new().encode(frame, &mut buf);
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_open_frame_carries_mode_and_token() {
        let frame = Frame::open(
            ChannelId::new(7),
            ChannelMode::READWRITE,
            Some(Bytes::from("secret")),
        )
        .unwrap();

        let bytes = frame.to_bytes().unwrap();
        assert_eq!(&bytes[..HEADER_SIZE], &[0, 13, 0, 0, 0, 7, (1 << 3) | 3]);
        assert_eq!(&bytes[HEADER_SIZE..], b"secret");
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = FrameCodec::new();

        let frame = Frame::new(
            ChannelId::new(3),
            Opcode::Open,
            open_flag::REDIRECT,
            Bytes::from_static(&[0, 0, 0, 9, b'h', b'i']),
        )
        .unwrap();

        let full = frame.to_bytes().unwrap();

        // Feed one byte at a time
        let mut buf = BytesMut::new();
        for (i, byte) in full.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            let result = codec.decode(&mut buf).unwrap();
            if i + 1 < full.len() {
                assert!(result.is_none(), "decoded early at byte {}", i);
            } else {
                assert_eq!(result.unwrap(), frame);
            }
        }
    }

    #[test]
    fn test_codec_multiple_frames_in_one_read() {
        let mut codec = FrameCodec::new();

        let first = Frame::new(ChannelId::new(1), Opcode::Noop, 0, Bytes::new()).unwrap();
        let second = Frame::data(ChannelId::new(2), 1, false, Bytes::from_static(b"x")).unwrap();

        let mut buf = BytesMut::new();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_from_bytes_incomplete() {
        let bytes = Frame::data(ChannelId::new(1), 0, true, Bytes::from("hello"))
            .unwrap()
            .to_bytes()
            .unwrap();

        let result = Frame::from_bytes(&bytes[..bytes.len() - 1]);
        assert!(matches!(
            result,
            Err(ProtocolError::IncompleteFrame { expected: 12, actual: 11 })
        ));
    }
}
