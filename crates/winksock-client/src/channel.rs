//! User-facing channel handle
//!
//! A channel is opened on a shared connection, receives DATA and SIGNAL
//! payloads into per-channel queues, and records the first error or END
//! signal that closed it.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::{watch, Notify};
use winksock_protocol::{signal_flag, ChannelId, ChannelMode, Frame, MAX_PRIORITY};

use crate::address::Address;
use crate::connection::ConnectionHandle;
use crate::error::ChannelError;
use crate::event::{ChannelData, ChannelEvent, ChannelSignal};
use crate::open_request::{OpenOutcome, OpenRequest};
use crate::registry::ConnectionRegistry;

/// Observable channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection (never connected, or destroyed)
    Disconnected,
    /// OPEN requested, no response yet
    Connecting,
    Open,
    /// `close` called, waiting for the server's END
    Closing,
}

/// Why a channel was destroyed
#[derive(Debug, Clone)]
pub(crate) enum Teardown {
    Clean,
    Error(ChannelError),
    End(ChannelSignal),
}

#[derive(Default)]
struct ChannelInner {
    id: ChannelId,
    mode: ChannelMode,
    connection: Option<ConnectionHandle>,
    connected: bool,
    closing: bool,
    /// OPEN request outstanding on the connection
    awaiting_open: bool,
    /// END to send once the OPEN response arrives
    pending_close: Option<Frame>,
    message: String,
    error: Option<ChannelError>,
    end_signal: Option<ChannelSignal>,
}

impl ChannelInner {
    fn state(&self) -> ChannelState {
        if self.connection.is_none() {
            ChannelState::Disconnected
        } else if self.closing {
            ChannelState::Closing
        } else if self.connected {
            ChannelState::Open
        } else {
            ChannelState::Connecting
        }
    }

    fn permits(&self, check: fn(&ChannelMode) -> bool) -> bool {
        self.connected && !self.closing && check(&self.mode)
    }
}

struct ChannelShared {
    registry: ConnectionRegistry,
    inner: Mutex<ChannelInner>,
    data: Mutex<VecDeque<ChannelData>>,
    signals: Mutex<VecDeque<ChannelSignal>>,
    state: watch::Sender<ChannelState>,
    events: Notify,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A channel on a multiplexed winksock connection
///
/// Clones refer to the same channel.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<ChannelShared>,
}

impl Channel {
    /// Create a disconnected channel that will share connections through `registry`
    pub fn new(registry: &ConnectionRegistry) -> Self {
        let (state, _) = watch::channel(ChannelState::Disconnected);
        Self {
            shared: Arc::new(ChannelShared {
                registry: registry.clone(),
                inner: Mutex::new(ChannelInner::default()),
                data: Mutex::new(VecDeque::new()),
                signals: Mutex::new(VecDeque::new()),
                state,
                events: Notify::new(),
            }),
        }
    }

    /// Open the channel named by `address` with the given mode
    ///
    /// Returns once the connection has accepted the request. The server's
    /// answer arrives later; use [`Channel::wait_open`] or
    /// [`Channel::check_error`] to observe it. A token in the address is
    /// used when `token` is `None`.
    pub async fn connect(
        &self,
        address: &str,
        mode: ChannelMode,
        token: Option<Bytes>,
    ) -> Result<(), ChannelError> {
        if lock(&self.shared.inner).connection.is_some() {
            return Err(ChannelError::AlreadyConnected);
        }

        if !mode.is_valid() {
            return Err(ChannelError::Mode(mode.bits()));
        }

        let address = Address::parse(address, self.shared.registry.config().default_port)?;
        let channel_id = address.channel_id()?;
        let token = token.or_else(|| address.token.clone().map(Bytes::from));
        let frame = Frame::open(channel_id, mode, token)?;

        let connection = self.shared.registry.acquire(&address.endpoint());

        {
            let mut inner = lock(&self.shared.inner);
            if inner.connection.is_some() {
                drop(inner);
                connection.release();
                return Err(ChannelError::AlreadyConnected);
            }

            *inner = ChannelInner {
                id: channel_id,
                mode,
                connection: Some(connection.clone()),
                awaiting_open: true,
                ..ChannelInner::default()
            };
            lock(&self.shared.data).clear();
            lock(&self.shared.signals).clear();
            self.publish_state(&inner);
        }

        tracing::debug!(
            "Connecting {} ({}) via {}",
            channel_id,
            mode,
            connection.endpoint()
        );

        let request = OpenRequest::new(self.clone(), channel_id, frame);
        match connection.request_open(request).await {
            Ok(outcome) => {
                if outcome == OpenOutcome::Queued {
                    tracing::debug!("OPEN for {} queued behind another request", channel_id);
                }
                Ok(())
            }
            Err(e) => {
                // The request never reached the connection's tables
                let mut inner = lock(&self.shared.inner);
                if let Some(connection) = inner.connection.take() {
                    inner.awaiting_open = false;
                    connection.release();
                }
                self.publish_state(&inner);
                Err(e)
            }
        }
    }

    /// Wait until the OPEN request is answered
    ///
    /// Fails with the recorded error if the channel was denied or torn down.
    pub async fn wait_open(&self) -> Result<(), ChannelError> {
        let mut state = self.shared.state.subscribe();
        // The sender lives as long as `self`
        let _ = state
            .wait_for(|state| *state != ChannelState::Connecting)
            .await;

        if self.is_connected() {
            return Ok(());
        }
        self.check_error()?;
        Err(ChannelError::NotConnected)
    }

    /// Subscribe to state changes
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.shared.state.subscribe()
    }

    /// Send a DATA frame and wait for it to be written
    pub async fn write(
        &self,
        data: impl Into<Bytes>,
        priority: u8,
        is_text: bool,
    ) -> Result<(), ChannelError> {
        let data = data.into();
        let (connection, id) =
            self.permitted_connection(ChannelMode::can_write, "channel is not writable")?;

        if priority > MAX_PRIORITY {
            return Err(ChannelError::InvalidPriority {
                priority,
                max: MAX_PRIORITY,
            });
        }

        if data.is_empty() {
            return Err(ChannelError::Protocol(
                "payload data cannot be zero-length".to_string(),
            ));
        }

        let frame = Frame::data(id, priority, is_text, data)?;
        connection.send(frame).await
    }

    /// Send a UTF-8 DATA frame at priority 0
    pub async fn write_text(&self, text: &str) -> Result<(), ChannelError> {
        self.write(Bytes::copy_from_slice(text.as_bytes()), 0, true)
            .await
    }

    /// Send a SIGNAL/EMIT frame
    pub async fn emit(&self, data: impl Into<Bytes>) -> Result<(), ChannelError> {
        let (connection, id) =
            self.permitted_connection(ChannelMode::can_emit, "channel is not emitable")?;
        let frame = Frame::signal(id, signal_flag::EMIT, data)?;
        connection.send(frame).await
    }

    /// Close the channel, optionally attaching a payload to the END signal
    ///
    /// An OPEN that has not reached the socket yet is withdrawn and the
    /// channel is released immediately. If the OPEN is in flight the END is
    /// sent once the server answers. Otherwise END goes out now and the
    /// channel stays in [`ChannelState::Closing`] until the server confirms.
    pub async fn close(&self, data: Option<Bytes>) -> Result<(), ChannelError> {
        let end = Frame::end(ChannelId::BROADCAST, data)?;

        let (connection, id, awaiting_open) = {
            let mut inner = lock(&self.shared.inner);
            let Some(connection) = inner.connection.clone() else {
                return Ok(());
            };
            if inner.closing {
                return Ok(());
            }
            inner.closing = true;
            self.publish_state(&inner);
            (connection, inner.id, inner.awaiting_open)
        };

        let id = if awaiting_open {
            if connection.cancel_open(self.clone(), id).await {
                tracing::debug!("Withdrew OPEN for {} before it was sent", id);
                self.destroy(Teardown::Clean);
                return Ok(());
            }

            let mut inner = lock(&self.shared.inner);
            if inner.connection.is_none() {
                return Ok(());
            }
            if inner.awaiting_open {
                inner.pending_close = Some(end);
                return Ok(());
            }
            inner.id
        } else {
            id
        };

        tracing::debug!("Closing {}", id);
        connection.send(end.with_channel_id(id)).await
    }

    /// Next queued DATA payload
    pub fn pop_data(&self) -> Option<ChannelData> {
        lock(&self.shared.data).pop_front()
    }

    /// Next queued SIGNAL payload
    pub fn pop_signal(&self) -> Option<ChannelSignal> {
        lock(&self.shared.signals).pop_front()
    }

    pub fn has_data(&self) -> bool {
        !lock(&self.shared.data).is_empty()
    }

    pub fn has_signal(&self) -> bool {
        !lock(&self.shared.signals).is_empty()
    }

    /// Surface and clear the recorded error
    pub fn check_error(&self) -> Result<(), ChannelError> {
        match lock(&self.shared.inner).error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The END signal that closed the channel, if any
    pub fn take_end_signal(&self) -> Option<ChannelSignal> {
        lock(&self.shared.inner).end_signal.take()
    }

    /// Wait for the next DATA or SIGNAL payload
    ///
    /// Returns `Ok(None)` once the channel is disconnected and both queues
    /// are drained, or the recorded error if one is pending.
    pub async fn next_event(&self) -> Result<Option<ChannelEvent>, ChannelError> {
        loop {
            let notified = self.shared.events.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.check_error()?;
            if let Some(data) = self.pop_data() {
                return Ok(Some(ChannelEvent::Data(data)));
            }
            if let Some(signal) = self.pop_signal() {
                return Ok(Some(ChannelEvent::Signal(signal)));
            }
            if self.state() == ChannelState::Disconnected {
                return Ok(None);
            }

            notified.await;
        }
    }

    pub fn state(&self) -> ChannelState {
        lock(&self.shared.inner).state()
    }

    /// Channel id; after a redirect this is the id the server assigned
    pub fn channel_id(&self) -> ChannelId {
        lock(&self.shared.inner).id
    }

    pub fn mode(&self) -> ChannelMode {
        lock(&self.shared.inner).mode
    }

    /// Message the server attached to its OPEN response
    pub fn message(&self) -> String {
        lock(&self.shared.inner).message.clone()
    }

    /// Connection this channel is multiplexed on
    pub fn connection(&self) -> Option<ConnectionHandle> {
        lock(&self.shared.inner).connection.clone()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.inner).connected
    }

    pub fn is_closing(&self) -> bool {
        lock(&self.shared.inner).closing
    }

    pub fn is_readable(&self) -> bool {
        lock(&self.shared.inner).permits(ChannelMode::can_read)
    }

    pub fn is_writable(&self) -> bool {
        lock(&self.shared.inner).permits(ChannelMode::can_write)
    }

    pub fn is_emitable(&self) -> bool {
        lock(&self.shared.inner).permits(ChannelMode::can_emit)
    }

    pub(crate) fn ptr_eq(&self, other: &Channel) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Mark the channel open under `id`
    ///
    /// Returns the END frame to send if `close` was called while the OPEN
    /// was in flight.
    pub(crate) fn open_success(&self, id: ChannelId, message: String) -> Option<Frame> {
        let mut inner = lock(&self.shared.inner);
        inner.id = id;
        inner.connected = true;
        inner.awaiting_open = false;
        inner.message = message;
        let close = inner.pending_close.take().map(|end| end.with_channel_id(id));
        self.publish_state(&inner);
        close
    }

    pub(crate) fn push_data(&self, data: ChannelData) {
        lock(&self.shared.data).push_back(data);
        self.shared.events.notify_waiters();
    }

    pub(crate) fn push_signal(&self, signal: ChannelSignal) {
        lock(&self.shared.signals).push_back(signal);
        self.shared.events.notify_waiters();
    }

    /// Detach from the connection and record why
    ///
    /// Queued payloads are kept so they can still be drained.
    pub(crate) fn destroy(&self, reason: Teardown) {
        let mut inner = lock(&self.shared.inner);
        let Some(connection) = inner.connection.take() else {
            return;
        };

        tracing::debug!("Destroying {} on {}", inner.id, connection.endpoint());

        inner.id = ChannelId::BROADCAST;
        inner.connected = false;
        inner.closing = false;
        inner.awaiting_open = false;
        inner.pending_close = None;

        match reason {
            Teardown::Clean => {}
            Teardown::Error(e) => inner.error = Some(e),
            Teardown::End(signal) => inner.end_signal = Some(signal),
        }

        connection.release();
        self.publish_state(&inner);
        drop(inner);
        self.shared.events.notify_waiters();
    }

    fn permitted_connection(
        &self,
        check: fn(&ChannelMode) -> bool,
        denied: &'static str,
    ) -> Result<(ConnectionHandle, ChannelId), ChannelError> {
        let mut inner = lock(&self.shared.inner);

        let connection = match (&inner.connection, inner.connected) {
            (Some(connection), true) => connection.clone(),
            _ => {
                if let Some(e) = inner.error.take() {
                    return Err(e);
                }
                return Err(ChannelError::NotConnected);
            }
        };

        if !inner.permits(check) {
            return Err(ChannelError::PermissionDenied(denied));
        }

        Ok((connection, inner.id))
    }

    fn publish_state(&self, inner: &ChannelInner) {
        self.shared.state.send_replace(inner.state());
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = lock(&self.shared.inner);
        f.debug_struct("Channel")
            .field("id", &inner.id)
            .field("mode", &inner.mode)
            .field("state", &inner.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::EndpointKey;

    fn open_channel(registry: &ConnectionRegistry, mode: ChannelMode) -> Channel {
        let channel = Channel::new(registry);
        let connection = registry.acquire(&EndpointKey::new("127.0.0.1", 9, ""));
        {
            let mut inner = lock(&channel.shared.inner);
            inner.mode = mode;
            inner.connection = Some(connection);
            inner.awaiting_open = true;
        }
        channel.open_success(ChannelId::new(1), "welcome".to_string());
        channel
    }

    #[tokio::test]
    async fn test_permission_predicates() {
        let registry = ConnectionRegistry::default();
        let cases = [
            (ChannelMode::READ, true, false, false),
            (ChannelMode::WRITE, false, true, false),
            (ChannelMode::READWRITE, true, true, false),
            (ChannelMode::READEMIT, true, false, true),
            (ChannelMode::WRITEEMIT, false, true, true),
            (ChannelMode::READWRITEEMIT, true, true, true),
        ];

        for (mode, readable, writable, emitable) in cases {
            let channel = open_channel(&registry, mode);
            assert_eq!(channel.is_readable(), readable, "{}", mode);
            assert_eq!(channel.is_writable(), writable, "{}", mode);
            assert_eq!(channel.is_emitable(), emitable, "{}", mode);
            assert_eq!(channel.message(), "welcome");
        }
    }

    #[tokio::test]
    async fn test_predicates_false_while_closing() {
        let registry = ConnectionRegistry::default();
        let channel = open_channel(&registry, ChannelMode::READWRITEEMIT);

        lock(&channel.shared.inner).closing = true;
        assert!(!channel.is_readable());
        assert!(!channel.is_writable());
        assert!(!channel.is_emitable());
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_mode() {
        let channel = Channel::new(&ConnectionRegistry::default());
        for mode in [ChannelMode::LISTEN, ChannelMode::EMIT, ChannelMode::from_bits(8)] {
            let result = channel.connect("127.0.0.1/1", mode, None).await;
            assert_eq!(result, Err(ChannelError::Mode(mode.bits())));
        }
        assert_eq!(channel.state(), ChannelState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_addresses() {
        let registry = ConnectionRegistry::default();
        let channel = Channel::new(&registry);

        assert!(matches!(
            channel
                .connect("https://127.0.0.1/1", ChannelMode::READ, None)
                .await,
            Err(ChannelError::UnsupportedProtocol(_))
        ));
        assert!(matches!(
            channel
                .connect("127.0.0.1:notaport/1", ChannelMode::READ, None)
                .await,
            Err(ChannelError::Address(_))
        ));
        assert!(matches!(
            channel.connect("127.0.0.1/0", ChannelMode::READ, None).await,
            Err(ChannelError::Address(_))
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_write_requires_open_channel() {
        let channel = Channel::new(&ConnectionRegistry::default());
        assert_eq!(
            channel.write("x", 0, true).await,
            Err(ChannelError::NotConnected)
        );
        assert_eq!(channel.emit("x").await, Err(ChannelError::NotConnected));
    }

    #[tokio::test]
    async fn test_write_checks_permission_and_priority() {
        let registry = ConnectionRegistry::default();

        let reader = open_channel(&registry, ChannelMode::READ);
        assert!(matches!(
            reader.write("x", 0, true).await,
            Err(ChannelError::PermissionDenied(_))
        ));
        assert!(matches!(
            reader.emit("x").await,
            Err(ChannelError::PermissionDenied(_))
        ));

        let writer = open_channel(&registry, ChannelMode::WRITE);
        assert_eq!(
            writer.write("x", 4, false).await,
            Err(ChannelError::InvalidPriority {
                priority: 4,
                max: MAX_PRIORITY
            })
        );
        assert!(matches!(
            writer.write(Bytes::new(), 0, false).await,
            Err(ChannelError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_destroy_records_reason_and_keeps_queues() {
        let registry = ConnectionRegistry::default();
        let channel = open_channel(&registry, ChannelMode::READ);
        let connection = channel.connection().unwrap();
        assert_eq!(connection.refcount(), 1);

        channel.push_data(ChannelData::new(0, true, Bytes::from("queued")));
        channel.destroy(Teardown::End(ChannelSignal::new(Bytes::from("bye"))));

        assert_eq!(channel.state(), ChannelState::Disconnected);
        assert_eq!(channel.channel_id(), ChannelId::BROADCAST);
        assert_eq!(connection.refcount(), 0);
        assert_eq!(
            channel.take_end_signal().unwrap().payload(),
            &Bytes::from("bye")
        );
        assert_eq!(
            channel.pop_data().unwrap().as_str(),
            Some("queued")
        );

        // Second destroy is a no-op
        channel.destroy(Teardown::Error(ChannelError::AlreadyOpen));
        assert_eq!(channel.check_error(), Ok(()));
    }

    #[tokio::test]
    async fn test_next_event_drains_then_ends() {
        let registry = ConnectionRegistry::default();
        let channel = open_channel(&registry, ChannelMode::READ);

        channel.push_signal(ChannelSignal::new(Bytes::from("sig")));
        channel.push_data(ChannelData::new(1, false, Bytes::from("data")));
        channel.destroy(Teardown::Clean);

        assert!(matches!(
            channel.next_event().await,
            Ok(Some(ChannelEvent::Data(_)))
        ));
        assert!(matches!(
            channel.next_event().await,
            Ok(Some(ChannelEvent::Signal(_)))
        ));
        assert_eq!(channel.next_event().await, Ok(None));
    }

    #[tokio::test]
    async fn test_next_event_wakes_on_push() {
        let registry = ConnectionRegistry::default();
        let channel = open_channel(&registry, ChannelMode::READ);

        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.next_event().await })
        };
        tokio::task::yield_now().await;

        channel.push_data(ChannelData::new(0, true, Bytes::from("late")));
        let event = waiter.await.unwrap().unwrap();
        assert!(matches!(event, Some(ChannelEvent::Data(d)) if d.as_str() == Some("late")));
    }

    #[tokio::test]
    async fn test_pending_close_is_readdressed() {
        let registry = ConnectionRegistry::default();
        let channel = Channel::new(&registry);
        {
            let mut inner = lock(&channel.shared.inner);
            inner.connection = Some(registry.acquire(&EndpointKey::new("127.0.0.1", 9, "")));
            inner.awaiting_open = true;
            inner.closing = true;
            inner.pending_close = Some(Frame::end(ChannelId::new(3), None).unwrap());
        }

        let close = channel.open_success(ChannelId::new(8), String::new()).unwrap();
        assert_eq!(close.channel_id, ChannelId::new(8));
        assert_eq!(channel.state(), ChannelState::Closing);
    }
}
