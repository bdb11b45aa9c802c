//! Connection task: OPEN bookkeeping and inbound frame dispatch

use std::collections::{HashMap, VecDeque};
use std::sync::Weak;

use bytes::Bytes;
use futures::stream::SplitStream;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use winksock_protocol::{open_flag, signal_flag, ChannelId, Frame, Opcode, ProtocolError};

use super::writer::{self, Outbound};
use super::{handshake, Command, ConnectionHandle, FrameTransport};
use crate::channel::{Channel, Teardown};
use crate::config::ClientConfig;
use crate::error::ChannelError;
use crate::event::{ChannelData, ChannelSignal};
use crate::open_request::{OpenOutcome, OpenRequest};
use crate::registry::RegistryInner;

const DEFAULT_DENY_MESSAGE: &str = "not allowed to open channel";
const DEFAULT_SIGNAL_ERROR: &str = "bad signal";

pub(crate) struct Connection {
    handle: ConnectionHandle,
    config: ClientConfig,
    registry: Weak<RegistryInner>,
    commands: mpsc::UnboundedReceiver<Command>,

    handshake: Option<JoinHandle<()>>,
    handshaked: bool,
    destroying: bool,
    next_order: u64,

    /// Requests awaiting an OPEN response, at most one per id
    pending: HashMap<ChannelId, OpenRequest>,
    /// Requests for an id that already has one pending
    wait_queues: HashMap<ChannelId, VecDeque<OpenRequest>>,
    open_channels: HashMap<ChannelId, Channel>,

    frames: Option<SplitStream<FrameTransport>>,
    writer: Option<mpsc::UnboundedSender<Outbound>>,
}

impl Connection {
    pub(crate) fn new(
        handle: ConnectionHandle,
        config: ClientConfig,
        registry: Weak<RegistryInner>,
        commands: mpsc::UnboundedReceiver<Command>,
    ) -> Self {
        Self {
            handle,
            config,
            registry,
            commands,
            handshake: None,
            handshaked: false,
            destroying: false,
            next_order: 0,
            pending: HashMap::new(),
            wait_queues: HashMap::new(),
            open_channels: HashMap::new(),
            frames: None,
            writer: None,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                frame = next_frame(&mut self.frames) => match frame {
                    Some(Ok(frame)) => self.dispatch(frame),
                    Some(Err(e)) => self.destroy(Some(e.into())),
                    None => self.destroy(Some(ChannelError::Io(
                        "connection closed by the server".to_string(),
                    ))),
                },
            }

            if self.destroying {
                break;
            }
        }

        tracing::debug!("Connection task for {} exited", self.handle.endpoint());
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::RequestOpen { request, reply } => {
                let _ = reply.send(self.request_open(request));
            }
            Command::CancelOpen {
                channel,
                channel_id,
                reply,
            } => {
                let _ = reply.send(self.cancel_open(&channel, channel_id));
            }
            Command::Send { frame, ack } => self.write(frame, ack),
            Command::CheckIdle => self.check_idle(),
            Command::Handshaked(Ok(transport)) => self.handshake_complete(transport),
            Command::Handshaked(Err(e)) => {
                tracing::warn!("Handshake with {} failed: {}", self.handle.endpoint(), e);
                self.destroy(Some(e));
            }
            Command::WriteFailed(e) => self.destroy(Some(e)),
        }
    }

    fn request_open(&mut self, mut request: OpenRequest) -> Result<OpenOutcome, ChannelError> {
        let id = request.channel_id;

        if self.open_channels.contains_key(&id) {
            tracing::debug!("Refusing OPEN for {}: already open", id);
            return Err(ChannelError::AlreadyOpen);
        }

        if self.pending.contains_key(&id) {
            tracing::debug!("Queueing OPEN for {} behind pending request", id);
            self.wait_queues.entry(id).or_default().push_back(request);
            return Ok(OpenOutcome::Queued);
        }

        request.order = self.take_order();

        if !self.handshaked {
            self.pending.insert(id, request);
            self.start_handshake();
            return Ok(OpenOutcome::Deferred);
        }

        self.transmit(&mut request);
        self.pending.insert(id, request);
        Ok(OpenOutcome::Sent)
    }

    fn cancel_open(&mut self, channel: &Channel, id: ChannelId) -> bool {
        if let Some(request) = self.pending.get(&id) {
            if request.belongs_to(channel) {
                if request.sent {
                    return false;
                }
                self.pending.remove(&id);
                self.promote_waiting(id);
                tracing::debug!("Cancelled unsent OPEN for {}", id);
                return true;
            }
        }

        let Some(queue) = self.wait_queues.get_mut(&id) else {
            return false;
        };

        let before = queue.len();
        queue.retain(|request| !request.belongs_to(channel));
        let removed = queue.len() != before;
        if queue.is_empty() {
            self.wait_queues.remove(&id);
        }
        removed
    }

    fn start_handshake(&mut self) {
        if self.handshake.is_some() {
            return;
        }

        let key = self.handle.endpoint().clone();
        let config = self.config.clone();
        let events = self.handle.shared.commands.clone();

        self.handshake = Some(tokio::spawn(async move {
            let result = handshake::establish(&key, &config).await;
            let _ = events.send(Command::Handshaked(result));
        }));
    }

    fn handshake_complete(&mut self, transport: FrameTransport) {
        let (sink, stream) = transport.split();
        self.writer = Some(writer::spawn(sink, self.handle.shared.commands.clone()));
        self.frames = Some(stream);
        self.handshake = None;
        self.handshaked = true;

        let mut ids: Vec<(u64, ChannelId)> = self
            .pending
            .iter()
            .map(|(id, request)| (request.order, *id))
            .collect();
        ids.sort_unstable();

        tracing::debug!(
            "Flushing {} pending OPEN request(s) to {}",
            ids.len(),
            self.handle.endpoint()
        );

        for (_, id) in ids {
            if let Some(mut request) = self.pending.remove(&id) {
                self.transmit(&mut request);
                self.pending.insert(id, request);
            }
        }
    }

    fn take_order(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    fn transmit(&mut self, request: &mut OpenRequest) {
        self.write(request.frame.clone(), None);
        request.sent = true;
    }

    /// Move the head of the wait queue for `id` into the pending slot
    fn promote_waiting(&mut self, id: ChannelId) {
        let Some(queue) = self.wait_queues.get_mut(&id) else {
            return;
        };
        let next = queue.pop_front();
        if queue.is_empty() {
            self.wait_queues.remove(&id);
        }

        if let Some(mut request) = next {
            request.order = self.take_order();
            if self.handshaked {
                self.transmit(&mut request);
            }
            self.pending.insert(id, request);
        }
    }

    fn write(&mut self, frame: Frame, ack: Option<oneshot::Sender<Result<(), ChannelError>>>) {
        let Some(writer) = &self.writer else {
            if let Some(ack) = ack {
                let _ = ack.send(Err(ChannelError::NotConnected));
            }
            return;
        };

        if let Err(mpsc::error::SendError(outbound)) = writer.send(Outbound { frame, ack }) {
            if let Some(ack) = outbound.ack {
                let _ = ack.send(Err(ChannelError::connection_closed()));
            }
        }
    }

    fn dispatch(&mut self, frame: Frame) {
        tracing::trace!(
            "Received {:?} frame for {} (flag {}, {} bytes)",
            frame.opcode,
            frame.channel_id,
            frame.flag,
            frame.payload.len()
        );

        match frame.opcode {
            Opcode::Noop => {}
            Opcode::Open => self.process_open(frame),
            Opcode::Data => self.process_data(frame),
            Opcode::Signal => self.process_signal(frame),
        }
    }

    fn process_open(&mut self, frame: Frame) {
        let id = frame.channel_id;

        let Some(channel) = self.pending.get(&id).map(|r| r.channel.clone()) else {
            self.protocol_error(format!("the server sent an invalid open frame for {}", id));
            return;
        };

        let (response_id, message) = match frame.flag {
            open_flag::ALLOW => (id, payload_text(&frame.payload)),
            open_flag::REDIRECT => match redirect_target(&frame.payload) {
                Some(target) => target,
                None => {
                    self.protocol_error("expected redirect channel from the server".to_string());
                    return;
                }
            },
            code => {
                self.pending.remove(&id);
                let message = if frame.payload.is_empty() {
                    DEFAULT_DENY_MESSAGE.to_string()
                } else {
                    payload_text(&frame.payload)
                };
                tracing::debug!("OPEN for {} denied ({}): {}", id, code, message);
                channel.destroy(Teardown::Error(ChannelError::OpenDenied { code, message }));
                self.promote_waiting(id);
                return;
            }
        };

        if response_id.is_broadcast() {
            self.protocol_error("the server redirected to channel 0".to_string());
            return;
        }

        if self.open_channels.contains_key(&response_id) {
            self.protocol_error(format!("the server redirected to open {}", response_id));
            return;
        }

        self.pending.remove(&id);
        self.open_channels.insert(response_id, channel.clone());
        tracing::debug!("Opened {} (requested {})", response_id, id);

        if let Some(close) = channel.open_success(response_id, message) {
            self.write(close, None);
        }

        if response_id == id {
            if let Some(queue) = self.wait_queues.remove(&id) {
                for request in queue {
                    request
                        .channel
                        .destroy(Teardown::Error(ChannelError::AlreadyOpen));
                }
            }
        } else {
            self.promote_waiting(id);
        }
    }

    fn process_data(&mut self, frame: Frame) {
        if frame.payload.is_empty() {
            self.protocol_error("zero data frame received".to_string());
            return;
        }

        let id = frame.channel_id;
        match self.open_channels.get(&id) {
            Some(channel) => channel.push_data(ChannelData::from_flag(frame.flag, frame.payload)),
            None => self.protocol_error(format!("no channel available to take data for {}", id)),
        }
    }

    fn process_signal(&mut self, frame: Frame) {
        let id = frame.channel_id;

        if id.is_broadcast() {
            if frame.flag == signal_flag::EMIT {
                for channel in self.open_channels.values() {
                    channel.push_signal(ChannelSignal::new(frame.payload.clone()));
                }
                return;
            }

            let reason = signal_teardown(frame.flag, frame.payload);
            tracing::debug!("Server ended all {} channel(s)", self.open_channels.len());
            for (_, channel) in self.open_channels.drain() {
                channel.destroy(reason.clone());
            }
            self.check_idle();
            return;
        }

        let Some(channel) = self.open_channels.get(&id).cloned() else {
            self.protocol_error(format!("received signal for unknown {}", id));
            return;
        };

        if frame.flag == signal_flag::EMIT {
            channel.push_signal(ChannelSignal::new(frame.payload));
            return;
        }

        if !channel.is_closing() {
            match Frame::end(id, Some(frame.payload.clone())) {
                Ok(ack) => self.write(ack, None),
                Err(e) => tracing::warn!("Failed to build END acknowledgement: {}", e),
            }
        }

        self.open_channels.remove(&id);
        channel.destroy(signal_teardown(frame.flag, frame.payload));
    }

    fn protocol_error(&mut self, message: String) {
        self.destroy(Some(ChannelError::Protocol(message)));
    }

    fn check_idle(&mut self) {
        if self.destroying || self.handle.refcount() != 0 {
            return;
        }

        if let Some(registry) = self.registry.upgrade() {
            if !registry.remove_idle(self.handle.endpoint(), &self.handle) {
                return;
            }
        }

        tracing::debug!("No more references to {}, closing", self.handle.endpoint());
        self.destroy(None);
    }

    /// Tear the connection down; `None` is a clean shutdown
    fn destroy(&mut self, error: Option<ChannelError>) {
        if self.destroying {
            return;
        }
        self.destroying = true;

        match &error {
            Some(e) => tracing::warn!("Destroying connection to {}: {}", self.handle.endpoint(), e),
            None => tracing::info!("Closing connection to {}", self.handle.endpoint()),
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.handle.endpoint(), &self.handle);
        }

        let reason = match error {
            Some(e) => Teardown::Error(e),
            None => Teardown::Clean,
        };

        for (_, request) in self.pending.drain() {
            request.channel.destroy(reason.clone());
        }
        for (_, queue) in self.wait_queues.drain() {
            for request in queue {
                request.channel.destroy(reason.clone());
            }
        }
        for (_, channel) in self.open_channels.drain() {
            channel.destroy(reason.clone());
        }

        if let Some(handshake) = self.handshake.take() {
            handshake.abort();
        }
        self.frames = None;
        self.writer = None;
        self.handshaked = false;
    }
}

async fn next_frame(
    frames: &mut Option<SplitStream<FrameTransport>>,
) -> Option<Result<Frame, ProtocolError>> {
    match frames {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

fn payload_text(payload: &Bytes) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

/// Parse a REDIRECT payload: 4-byte target id followed by the message
fn redirect_target(payload: &Bytes) -> Option<(ChannelId, String)> {
    if payload.len() < 4 {
        return None;
    }
    let id = ChannelId::new(u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]));
    Some((id, String::from_utf8_lossy(&payload[4..]).into_owned()))
}

fn signal_teardown(flag: u8, payload: Bytes) -> Teardown {
    if flag == signal_flag::END {
        return Teardown::End(ChannelSignal::new(payload));
    }

    let message = if payload.is_empty() {
        DEFAULT_SIGNAL_ERROR.to_string()
    } else {
        payload_text(&payload)
    };
    Teardown::Error(ChannelError::Signal {
        code: flag,
        message,
    })
}
