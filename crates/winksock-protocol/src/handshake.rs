//! Plaintext upgrade handshake
//!
//! Before any frame is exchanged the client sends an HTTP-style upgrade request
//! and the server answers with a status line plus headers, terminated by a
//! blank line. 101 switches to framed mode, 300-304 redirect to `Location`.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;

/// Version tag advertised in the `Upgrade` header
pub const PROTOCOL_VERSION: &str = "winksock/1";

/// Upper bound on the size of a handshake response head
pub const MAX_HANDSHAKE_SIZE: usize = 8 * 1024;

/// Upgrade request sent once per connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Value of the `Host` header
    pub host: String,
    /// Request path (the endpoint's auth component)
    pub auth: String,
    /// Whether the server may answer with a redirect
    pub follow_redirects: bool,
}

impl HandshakeRequest {
    /// Encode the request head
    pub fn encode(&self, dst: &mut BytesMut) {
        let head = format!(
            "GET /{} HTTP/1.1\r\n\
             Connection: upgrade\r\n\
             Upgrade: {}\r\n\
             Host: {}\r\n\
             X-Follow-Redirects: {}\r\n\
             \r\n",
            self.auth,
            PROTOCOL_VERSION,
            self.host,
            if self.follow_redirects { "yes" } else { "no" },
        );
        dst.put_slice(head.as_bytes());
    }
}

/// What the server decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    /// 101, framed mode from here on
    Upgraded,
    /// 300-304 with a `Location` target
    Redirect { status: u16, location: String },
    /// Any other status
    Rejected { status: u16 },
}

/// Parsed response head
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    /// Numeric status code
    pub status: u16,
    /// Header fields in arrival order, names lowercased
    pub headers: Vec<(String, String)>,
}

impl HandshakeResponse {
    /// Parse a response head (status line followed by header lines)
    pub fn parse(head: &str) -> Result<Self, ProtocolError> {
        let mut lines = head
            .split('\n')
            .map(|line| line.trim_end_matches('\r'))
            .take_while(|line| !line.is_empty());

        let status_line = lines
            .next()
            .ok_or_else(|| ProtocolError::BadHandshake("empty response".to_string()))?;

        // "HTTP/1.1 101 Switching Protocols"
        let status = status_line
            .split_whitespace()
            .nth(1)
            .and_then(|code| code.parse::<u16>().ok())
            .ok_or_else(|| {
                ProtocolError::BadHandshake(format!(
                    "could not read the status from the response \"{}\"",
                    status_line
                ))
            })?;

        let headers = lines
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_ascii_lowercase(), value.trim().to_string()))
            })
            .collect();

        Ok(Self { status, headers })
    }

    /// First header with the given (case-insensitive) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Classify the response
    pub fn outcome(&self) -> Result<HandshakeOutcome, ProtocolError> {
        match self.status {
            101 => {
                if let Some(upgrade) = self.header("upgrade") {
                    if !upgrade.eq_ignore_ascii_case(PROTOCOL_VERSION) {
                        return Err(ProtocolError::BadHandshake(format!(
                            "bad protocol version: {}",
                            upgrade
                        )));
                    }
                }
                Ok(HandshakeOutcome::Upgraded)
            }
            300..=304 => {
                let location = self.header("location").ok_or_else(|| {
                    ProtocolError::BadHandshake(format!(
                        "redirect ({}) without a location",
                        self.status
                    ))
                })?;
                Ok(HandshakeOutcome::Redirect {
                    status: self.status,
                    location: location.to_string(),
                })
            }
            status => Ok(HandshakeOutcome::Rejected { status }),
        }
    }
}

/// Offset just past the blank line ending the head, if buffered
fn find_head_end(buf: &[u8]) -> Option<usize> {
    let mut line_start = 0;
    for (i, byte) in buf.iter().enumerate() {
        if *byte == b'\n' {
            let line = &buf[line_start..i];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.is_empty() {
                return Some(i + 1);
            }
            line_start = i + 1;
        }
    }
    None
}

/// Codec used on the socket until the upgrade completes
///
/// Only the response head is consumed; anything after the blank line stays in
/// the read buffer for the frame codec.
#[derive(Debug, Default)]
pub struct HandshakeCodec;

impl HandshakeCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for HandshakeCodec {
    type Item = HandshakeResponse;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(end) = find_head_end(src) else {
            if src.len() > MAX_HANDSHAKE_SIZE {
                return Err(ProtocolError::BadHandshake(
                    "response head too large".to_string(),
                ));
            }
            return Ok(None);
        };

        let head = src.split_to(end);
        HandshakeResponse::parse(&String::from_utf8_lossy(&head)).map(Some)
    }
}

impl Encoder<HandshakeRequest> for HandshakeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: HandshakeRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}
