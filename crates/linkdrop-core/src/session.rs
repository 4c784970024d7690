//! Delivery sessions.
//!
//! A [`DeliverySession`] is one connected device. It moves through
//! `Connecting -> Active -> Closed` exactly once:
//!
//! - on activation it registers in the presence registry, sends the
//!   `Connected` frame and records the device's last-seen time in the
//!   background;
//! - while active it writes whatever the router queued on its
//!   [`SessionHandle`] and watches the reader for closure or errors;
//! - on close it removes its own registry entry and closes the transport.
//!
//! The session task is the only writer to its transport. Everyone else talks
//! to it through the handle's queue.

use crate::presence::{DeviceKey, Presence, RegistryError};
use crate::sink::LinkSink;
use linkdrop_protocol::{DeviceId, ServerFrame};
use linkdrop_transport::{Connection, FrameReader, FrameWriter, Incoming, TransportError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, trace, warn};

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Default bound on frames queued for one session.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// How long closing the transport may take before it is abandoned.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Process-unique session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Allocate the next session id.
    #[must_use]
    pub fn next() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess_{}", self.0)
    }
}

/// Session errors.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    /// The claimed device id is missing or not a positive integer.
    #[error("Invalid device_id")]
    InvalidDeviceId,

    /// The session is gone.
    #[error("Session closed")]
    Closed,

    /// The session's frame queue is full.
    #[error("Session backlogged")]
    Backlogged,
}

/// Parse the `device_id` connection parameter.
///
/// # Errors
///
/// Returns [`SessionError::InvalidDeviceId`] unless `raw` is a positive
/// integer.
pub fn parse_device_id(raw: Option<&str>) -> Result<DeviceId, SessionError> {
    raw.and_then(|s| s.parse::<DeviceId>().ok())
        .filter(|id| *id > 0)
        .ok_or(SessionError::InvalidDeviceId)
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport is up, not yet registered.
    Connecting,
    /// Registered and reachable.
    Active,
    /// Deregistered, transport released.
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The device closed the connection.
    PeerClosed,
    /// Reading from the transport failed.
    ReadFailed,
    /// Writing to the transport failed.
    WriteFailed,
    /// A newer session for the same device took over.
    Superseded,
    /// The registry refused the session.
    Rejected,
}

impl CloseReason {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::ReadFailed => "read_failed",
            CloseReason::WriteFailed => "write_failed",
            CloseReason::Superseded => "superseded",
            CloseReason::Rejected => "rejected",
        }
    }
}

/// Commands received by a session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// Write an encoded frame.
    Deliver(String),
    /// Close the session.
    Close(CloseReason),
}

/// Cloneable handle to a live session.
///
/// Frames go through a bounded queue. Close requests travel on a separate
/// channel so a full queue never blocks them.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    key: DeviceKey,
    frames: mpsc::Sender<String>,
    control: mpsc::UnboundedSender<CloseReason>,
}

impl SessionHandle {
    /// Create a handle with the default queue capacity.
    #[must_use]
    pub fn new(key: DeviceKey) -> (Self, SessionInbox) {
        Self::with_capacity(key, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a handle whose queue holds at most `capacity` frames.
    #[must_use]
    pub fn with_capacity(key: DeviceKey, capacity: usize) -> (Self, SessionInbox) {
        let (frames_tx, frames_rx) = mpsc::channel(capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: SessionId::next(),
            key,
            frames: frames_tx,
            control: control_tx,
        };
        let inbox = SessionInbox {
            frames: frames_rx,
            control: control_rx,
        };
        (handle, inbox)
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Registry key.
    #[must_use]
    pub fn key(&self) -> DeviceKey {
        self.key
    }

    /// Queue an encoded frame for delivery.
    ///
    /// Never blocks. Success means the frame was queued, not written.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Backlogged`] if the queue is full, or
    /// [`SessionError::Closed`] if the session has already ended.
    pub fn push(&self, text: String) -> Result<(), SessionError> {
        self.frames.try_send(text).map_err(|e| match e {
            TrySendError::Full(_) => SessionError::Backlogged,
            TrySendError::Closed(_) => SessionError::Closed,
        })
    }

    /// Ask the session to close. Returns `false` if it already ended.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.control.send(reason).is_ok()
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.frames.is_closed()
    }
}

/// Receiving end of a session's queues.
#[derive(Debug)]
pub struct SessionInbox {
    frames: mpsc::Receiver<String>,
    control: mpsc::UnboundedReceiver<CloseReason>,
}

impl SessionInbox {
    /// Wait for the next command. Close requests come first.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<SessionCommand> {
        tokio::select! {
            biased;
            Some(reason) = self.control.recv() => Some(SessionCommand::Close(reason)),
            frame = self.frames.recv() => frame.map(SessionCommand::Deliver),
        }
    }

    /// Wait for a close request only.
    pub async fn recv_close(&mut self) -> Option<CloseReason> {
        self.control.recv().await
    }

    /// Take a command if one is queued. Close requests come first.
    pub fn try_recv(&mut self) -> Option<SessionCommand> {
        if let Ok(reason) = self.control.try_recv() {
            return Some(SessionCommand::Close(reason));
        }
        self.frames.try_recv().ok().map(SessionCommand::Deliver)
    }
}

/// One device's delivery session.
pub struct DeliverySession {
    handle: SessionHandle,
    inbox: SessionInbox,
    state: SessionState,
    registered: bool,
    presence: Arc<dyn Presence>,
    sink: Arc<dyn LinkSink>,
}

impl DeliverySession {
    /// Create a session for `key` in the `Connecting` state.
    #[must_use]
    pub fn new(key: DeviceKey, presence: Arc<dyn Presence>, sink: Arc<dyn LinkSink>) -> Self {
        let (handle, inbox) = SessionHandle::new(key);
        Self {
            handle,
            inbox,
            state: SessionState::Connecting,
            registered: false,
            presence,
            sink,
        }
    }

    /// Bound the frame queue to `capacity` frames.
    ///
    /// Must be called before [`run`](Self::run).
    #[must_use]
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        let (handle, inbox) = SessionHandle::with_capacity(self.key(), capacity);
        self.handle = handle;
        self.inbox = inbox;
        self
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.handle.id()
    }

    /// Registry key.
    #[must_use]
    pub fn key(&self) -> DeviceKey {
        self.handle.key()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session over `conn` until it closes.
    pub async fn run<C: Connection>(mut self, conn: C) -> CloseReason {
        let remote = conn.remote_addr();
        let (mut writer, mut reader) = conn.split();
        debug!(session = %self.id(), key = %self.key(), remote = ?remote, "Session connecting");

        let reason = match self.activate(&mut writer).await {
            Ok(()) => {
                serve(
                    self.handle.id(),
                    &mut self.inbox,
                    &mut writer,
                    &mut reader,
                )
                .await
            }
            Err(reason) => reason,
        };

        self.close(&mut writer, reason).await;
        reason
    }

    async fn activate<W: FrameWriter>(&mut self, writer: &mut W) -> Result<(), CloseReason> {
        let key = self.key();

        if let Err(e) = self.presence.register(self.handle.clone()) {
            warn!(session = %self.id(), key = %key, error = %e, "Session rejected");
            let notice = match e {
                RegistryError::AlreadyConnected(_) => "Device already connected",
            };
            if let Err(e) = writer.send(&ServerFrame::error(notice)).await {
                debug!(session = %self.id(), error = %e, "Failed to send rejection");
            }
            return Err(CloseReason::Rejected);
        }
        self.registered = true;
        self.state = SessionState::Active;

        if let Err(e) = writer.send(&ServerFrame::connected()).await {
            warn!(session = %self.id(), key = %key, error = %e, "Failed to send Connected frame");
            return Err(CloseReason::WriteFailed);
        }

        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            if let Err(e) = sink.touch_device_last_seen(key.device, key.user).await {
                warn!(key = %key, error = %e, "Failed to update last_seen");
            }
        });

        debug!(session = %self.id(), key = %key, "Session active");
        Ok(())
    }

    async fn close<W: FrameWriter>(&mut self, writer: &mut W, reason: CloseReason) {
        if !self.mark_closed() {
            return;
        }

        match tokio::time::timeout(CLOSE_TIMEOUT, writer.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(session = %self.id(), error = %e, "Transport close failed"),
            Err(_) => debug!(session = %self.id(), "Transport close timed out"),
        }
        debug!(session = %self.id(), key = %self.key(), reason = reason.as_str(), "Session closed");
    }

    /// Enter `Closed`. Returns `false` if the session was already closed.
    fn mark_closed(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;

        if std::mem::take(&mut self.registered) {
            self.presence.unregister(self.key(), self.id());
        }
        true
    }
}

impl Drop for DeliverySession {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

/// Active loop: write queued frames, watch the reader.
async fn serve<W: FrameWriter, R: FrameReader>(
    session: SessionId,
    inbox: &mut SessionInbox,
    writer: &mut W,
    reader: &mut R,
) -> CloseReason {
    loop {
        tokio::select! {
            biased;

            command = inbox.recv() => match command {
                Some(SessionCommand::Deliver(text)) => {
                    if let Err(reason) = write_frame(session, inbox, writer, reader, text).await {
                        return reason;
                    }
                }
                Some(SessionCommand::Close(reason)) => return reason,
                // The session keeps its own handle, so the queue outlives this loop.
                None => return CloseReason::Superseded,
            },

            incoming = reader.recv() => {
                if let Some(reason) = on_incoming(session, incoming) {
                    return reason;
                }
            }
        }
    }
}

/// Write one frame while still honoring close requests and reader events.
///
/// A writer stuck on a slow peer must not keep a dead session registered.
async fn write_frame<W: FrameWriter, R: FrameReader>(
    session: SessionId,
    inbox: &mut SessionInbox,
    writer: &mut W,
    reader: &mut R,
    text: String,
) -> Result<(), CloseReason> {
    let bytes = text.len();
    let write = writer.send_text(text);
    tokio::pin!(write);

    loop {
        tokio::select! {
            biased;

            Some(reason) = inbox.recv_close() => return Err(reason),

            result = &mut write => {
                return match result {
                    Ok(()) => {
                        trace!(session = %session, bytes, "Delivered frame");
                        Ok(())
                    }
                    Err(e) => {
                        warn!(session = %session, error = %e, "Delivery write failed");
                        Err(CloseReason::WriteFailed)
                    }
                };
            }

            incoming = reader.recv() => {
                if let Some(reason) = on_incoming(session, incoming) {
                    return Err(reason);
                }
            }
        }
    }
}

/// Inbound traffic only matters as a liveness signal.
fn on_incoming(
    session: SessionId,
    incoming: Result<Option<Incoming>, TransportError>,
) -> Option<CloseReason> {
    match incoming {
        Ok(Some(message)) => {
            trace!(session = %session, bytes = message.len(), "Ignoring inbound message");
            None
        }
        Ok(None) => Some(CloseReason::PeerClosed),
        Err(e) => {
            debug!(session = %session, error = %e, "Read failed");
            Some(CloseReason::ReadFailed)
        }
    }
}
