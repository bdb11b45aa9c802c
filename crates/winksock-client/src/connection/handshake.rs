//! Socket setup and the winksock/1 upgrade

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, FramedParts};
use winksock_protocol::{Frame, FrameCodec, HandshakeCodec, HandshakeOutcome, HandshakeRequest};

use super::FrameTransport;
use crate::address::{Address, EndpointKey};
use crate::config::ClientConfig;
use crate::error::ChannelError;

/// Connect to `key`, perform the upgrade and follow redirects
///
/// On success the returned transport speaks frames; any bytes that arrived
/// behind the response head are kept in its read buffer.
pub(crate) async fn establish(
    key: &EndpointKey,
    config: &ClientConfig,
) -> Result<FrameTransport, ChannelError> {
    let mut host = key.host.clone();
    let mut port = key.port;
    let mut auth = key.auth.clone();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        tracing::debug!("Connecting to {}:{} (attempt {})", host, port, attempt);

        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(|e| {
                ChannelError::Connect(format!(
                    "could not connect to the host \"{}\" on the port {}: {}",
                    host, port, e
                ))
            })?;

        if config.tcp_nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!("Failed to set TCP_NODELAY: {}", e);
            }
        }

        let mut framed = Framed::new(stream, HandshakeCodec::new());
        framed
            .send(HandshakeRequest {
                host: host.clone(),
                auth: auth.clone(),
                follow_redirects: config.follow_redirects,
            })
            .await
            .map_err(|e| ChannelError::Connect(format!("could not send upgrade request: {}", e)))?;

        let response = match framed.next().await {
            Some(response) => response?,
            None => {
                return Err(ChannelError::Connect(
                    "server closed the connection during the handshake".to_string(),
                ))
            }
        };

        match response.outcome()? {
            HandshakeOutcome::Upgraded => {
                tracing::info!("Handshake with {}:{} completed", host, port);
                return Ok(into_frame_transport(framed));
            }
            HandshakeOutcome::Redirect { status, location } => {
                if !config.follow_redirects {
                    return Err(ChannelError::Connect(
                        "bad handshake (redirection disabled)".to_string(),
                    ));
                }
                if attempt > config.max_redirects {
                    return Err(ChannelError::Connect(
                        "bad handshake (too many redirect attempts)".to_string(),
                    ));
                }

                let target = Address::parse(&location, config.default_port).map_err(|e| {
                    ChannelError::Connect(format!("bad redirect location \"{}\": {}", location, e))
                })?;

                tracing::debug!("Redirected ({}) to {}", status, location);
                host = target.host;
                port = target.port;
                auth = target.path;
            }
            HandshakeOutcome::Rejected { status } => {
                return Err(ChannelError::Connect(format!(
                    "server responded with bad HTTP response code, {}",
                    status
                )));
            }
        }
    }
}

/// Swap the handshake codec for the frame codec, keeping buffered bytes
fn into_frame_transport(framed: Framed<TcpStream, HandshakeCodec>) -> FrameTransport {
    let parts = framed.into_parts();
    let mut frame_parts = FramedParts::new::<Frame>(parts.io, FrameCodec::new());
    frame_parts.read_buf = parts.read_buf;
    frame_parts.write_buf = parts.write_buf;
    Framed::from_parts(frame_parts)
}
