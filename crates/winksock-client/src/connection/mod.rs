//! Multiplexed connections
//!
//! Each connection is owned by a single task that holds the socket and all
//! per-connection tables. Channels talk to it through a [`ConnectionHandle`].

mod actor;
mod handshake;
mod writer;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use winksock_protocol::{ChannelId, Frame, FrameCodec};

use crate::address::EndpointKey;
use crate::channel::Channel;
use crate::config::ClientConfig;
use crate::error::ChannelError;
use crate::open_request::{OpenOutcome, OpenRequest};
use crate::registry::RegistryInner;

pub(crate) type FrameTransport = Framed<TcpStream, FrameCodec>;

pub(crate) type Ack = oneshot::Sender<Result<(), ChannelError>>;

/// Messages processed by the connection task
pub(crate) enum Command {
    RequestOpen {
        request: OpenRequest,
        reply: oneshot::Sender<Result<OpenOutcome, ChannelError>>,
    },
    CancelOpen {
        channel: Channel,
        channel_id: ChannelId,
        reply: oneshot::Sender<bool>,
    },
    Send {
        frame: Frame,
        ack: Option<Ack>,
    },
    /// Reference count reached zero
    CheckIdle,
    Handshaked(Result<FrameTransport, ChannelError>),
    WriteFailed(ChannelError),
}

struct ConnectionShared {
    key: EndpointKey,
    commands: mpsc::UnboundedSender<Command>,
    refcount: AtomicUsize,
}

/// Handle to a connection task
#[derive(Clone)]
pub struct ConnectionHandle {
    shared: Arc<ConnectionShared>,
}

impl ConnectionHandle {
    /// Endpoint this connection serves
    pub fn endpoint(&self) -> &EndpointKey {
        &self.shared.key
    }

    /// Number of channels holding a reference
    pub fn refcount(&self) -> usize {
        self.shared.refcount.load(Ordering::SeqCst)
    }

    /// Whether the connection task has exited
    pub fn is_closed(&self) -> bool {
        self.shared.commands.is_closed()
    }

    /// Whether both handles refer to the same connection
    pub fn ptr_eq(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn acquire(&self) {
        self.shared.refcount.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop one reference; the connection is asked to check for teardown at zero
    pub(crate) fn release(&self) {
        let previous = self
            .shared
            .refcount
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));

        if previous == Ok(1) {
            let _ = self.shared.commands.send(Command::CheckIdle);
        }
    }

    /// Hand an OPEN request to the connection
    pub(crate) async fn request_open(
        &self,
        request: OpenRequest,
    ) -> Result<OpenOutcome, ChannelError> {
        let gone = || ChannelError::Connect("connection is already closed".to_string());
        let (reply, outcome) = oneshot::channel();
        self.command(Command::RequestOpen { request, reply })
            .map_err(|_| gone())?;
        outcome.await.unwrap_or_else(|_| Err(gone()))
    }

    /// Withdraw a request that has not been written yet
    ///
    /// Returns false if the request was already sent or is unknown. A closed
    /// connection has nothing in flight, so that counts as withdrawn.
    pub(crate) async fn cancel_open(&self, channel: Channel, channel_id: ChannelId) -> bool {
        let (reply, cancelled) = oneshot::channel();
        if self
            .command(Command::CancelOpen {
                channel,
                channel_id,
                reply,
            })
            .is_err()
        {
            return true;
        }
        cancelled.await.unwrap_or(true)
    }

    /// Write a frame and wait until it reaches the socket
    pub(crate) async fn send(&self, frame: Frame) -> Result<(), ChannelError> {
        let (ack, written) = oneshot::channel();
        self.command(Command::Send {
            frame,
            ack: Some(ack),
        })?;
        written
            .await
            .unwrap_or_else(|_| Err(ChannelError::connection_closed()))
    }

    fn command(&self, command: Command) -> Result<(), ChannelError> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| ChannelError::connection_closed())
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("endpoint", &self.shared.key)
            .field("refcount", &self.refcount())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Start a connection task for `key`
///
/// The socket is opened lazily, when the first OPEN request arrives.
pub(crate) fn spawn(
    key: EndpointKey,
    config: ClientConfig,
    registry: Weak<RegistryInner>,
) -> ConnectionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle {
        shared: Arc::new(ConnectionShared {
            key,
            commands: tx,
            refcount: AtomicUsize::new(0),
        }),
    };

    let connection = actor::Connection::new(handle.clone(), config, registry, rx);
    tokio::spawn(connection.run());

    handle
}
