//! Transport abstraction traits for Linkdrop.
//!
//! A [`Connection`] is split once, at the start of a session, into a writer
//! half and a reader half. The session task owns both halves and is the only
//! code that ever touches them.

use async_trait::async_trait;
use bytes::Bytes;
use linkdrop_protocol::{codec, ServerFrame};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound message exceeded the configured limit.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Received size in bytes.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] linkdrop_protocol::ProtocolError),
}

/// Something the device sent.
///
/// The delivery channel defines no client frames; inbound traffic only
/// proves the device is still there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// A text message.
    Text(String),
    /// A binary message.
    Binary(Bytes),
    /// A transport-level ping.
    Ping,
    /// A transport-level pong.
    Pong,
}

impl Incoming {
    /// Payload size in bytes (zero for control frames).
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Incoming::Text(text) => text.len(),
            Incoming::Binary(data) => data.len(),
            Incoming::Ping | Incoming::Pong => 0,
        }
    }

    /// Whether the message carried no payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Writer half of a connection.
#[async_trait]
pub trait FrameWriter: Send {
    /// Send one pre-encoded text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Encode and send a frame.
    async fn send(&mut self, frame: &ServerFrame) -> Result<(), TransportError> {
        let text = codec::encode(frame)?;
        self.send_text(text).await
    }

    /// Close the connection gracefully.
    ///
    /// Closing an already closed connection is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Reader half of a connection.
#[async_trait]
pub trait FrameReader: Send {
    /// Receive the next inbound message.
    ///
    /// Returns `Ok(None)` when the peer closed the connection cleanly.
    /// Implementations must be cancel safe, since sessions poll this inside
    /// `tokio::select!`.
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError>;
}

/// An established connection to a single device.
pub trait Connection: Send + 'static {
    /// Writer half.
    type Writer: FrameWriter + 'static;
    /// Reader half.
    type Reader: FrameReader + 'static;

    /// Split into writer and reader halves.
    fn split(self) -> (Self::Writer, Self::Reader);

    /// Remote address of the connection, if known.
    fn remote_addr(&self) -> Option<String> {
        None
    }
}
