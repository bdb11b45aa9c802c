//! Socket writer task
//!
//! All outbound frames for a connection go through one task so writes are
//! serialized and never interleave.

use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::mpsc;
use winksock_protocol::Frame;

use super::{Ack, Command, FrameTransport};
use crate::error::ChannelError;

pub(crate) struct Outbound {
    pub frame: Frame,
    pub ack: Option<Ack>,
}

/// Spawn the writer; failures are reported back as [`Command::WriteFailed`]
///
/// Frames already queued when the sender is dropped are still written
/// before the socket is shut down.
pub(crate) fn spawn(
    mut sink: SplitSink<FrameTransport, Frame>,
    events: mpsc::UnboundedSender<Command>,
) -> mpsc::UnboundedSender<Outbound> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    tokio::spawn(async move {
        while let Some(Outbound { frame, ack }) = rx.recv().await {
            tracing::trace!(
                "Writing {:?} frame for {} ({} bytes)",
                frame.opcode,
                frame.channel_id,
                frame.payload.len()
            );

            match sink.send(frame).await {
                Ok(()) => {
                    if let Some(ack) = ack {
                        let _ = ack.send(Ok(()));
                    }
                }
                Err(e) => {
                    let error = ChannelError::Io(format!("could not write to the connection: {}", e));
                    tracing::error!("Write failed: {}", error);
                    if let Some(ack) = ack {
                        let _ = ack.send(Err(error.clone()));
                    }
                    let _ = events.send(Command::WriteFailed(error));
                    return;
                }
            }
        }

        if let Err(e) = sink.close().await {
            tracing::debug!("Error shutting down connection: {}", e);
        }
    });

    tx
}
