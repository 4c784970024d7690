//! In-memory transport.
//!
//! [`pair`] returns a server-side [`MemoryConnection`] and the [`MemoryPeer`]
//! that plays the device. The peer sees every frame the server writes and can
//! inject inbound messages, read errors, write failures, stalled writes or a
//! disconnect.

use async_trait::async_trait;
use linkdrop_protocol::{codec, ServerFrame};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::traits::{Connection, FrameReader, FrameWriter, Incoming, TransportError};

enum PeerEvent {
    Message(Incoming),
    Error(String),
}

#[derive(Debug, Default)]
struct Flags {
    closed: AtomicBool,
    fail_writes: AtomicBool,
    stall_writes: AtomicBool,
}

/// Create a connected server/peer pair.
#[must_use]
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let flags = Arc::new(Flags::default());

    let conn = MemoryConnection {
        outbound: out_tx,
        inbound: in_rx,
        flags: Arc::clone(&flags),
    };
    let peer = MemoryPeer {
        sent: out_rx,
        inbound: Some(in_tx),
        flags,
    };
    (conn, peer)
}

/// Server side of an in-memory connection.
pub struct MemoryConnection {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<PeerEvent>,
    flags: Arc<Flags>,
}

impl Connection for MemoryConnection {
    type Writer = MemoryWriter;
    type Reader = MemoryReader;

    fn split(self) -> (Self::Writer, Self::Reader) {
        (
            MemoryWriter {
                outbound: self.outbound,
                flags: Arc::clone(&self.flags),
            },
            MemoryReader {
                inbound: self.inbound,
            },
        )
    }

    fn remote_addr(&self) -> Option<String> {
        Some("memory".to_string())
    }
}

/// Writer half of an in-memory connection.
pub struct MemoryWriter {
    outbound: mpsc::UnboundedSender<String>,
    flags: Arc<Flags>,
}

#[async_trait]
impl FrameWriter for MemoryWriter {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.flags.closed.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionClosed);
        }
        if self.flags.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("injected write failure".into()));
        }
        if self.flags.stall_writes.load(Ordering::SeqCst) {
            // A peer that stopped reading: the write never completes.
            std::future::pending::<()>().await;
        }

        self.outbound
            .send(text)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.flags.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Reader half of an in-memory connection.
pub struct MemoryReader {
    inbound: mpsc::UnboundedReceiver<PeerEvent>,
}

#[async_trait]
impl FrameReader for MemoryReader {
    async fn recv(&mut self) -> Result<Option<Incoming>, TransportError> {
        match self.inbound.recv().await {
            Some(PeerEvent::Message(incoming)) => Ok(Some(incoming)),
            Some(PeerEvent::Error(reason)) => Err(TransportError::ReceiveFailed(reason)),
            None => Ok(None),
        }
    }
}

/// The device end of an in-memory connection.
pub struct MemoryPeer {
    sent: mpsc::UnboundedReceiver<String>,
    inbound: Option<mpsc::UnboundedSender<PeerEvent>>,
    flags: Arc<Flags>,
}

impl MemoryPeer {
    /// Send a message to the server. Returns `false` once disconnected.
    pub fn send(&self, incoming: Incoming) -> bool {
        self.push(PeerEvent::Message(incoming))
    }

    /// Make the server's next read fail.
    pub fn fail_reads(&self, reason: impl Into<String>) -> bool {
        self.push(PeerEvent::Error(reason.into()))
    }

    /// Make every subsequent server write fail.
    pub fn fail_writes(&self) {
        self.flags.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Make every subsequent server write hang forever.
    pub fn stall_writes(&self) {
        self.flags.stall_writes.store(true, Ordering::SeqCst);
    }

    /// Close the device side cleanly.
    pub fn disconnect(&mut self) {
        self.inbound = None;
    }

    /// Whether the server closed its end.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.flags.closed.load(Ordering::SeqCst)
    }

    /// Wait for the next frame written by the server.
    ///
    /// Returns `None` once the server dropped its writer.
    pub async fn recv(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// Wait for and decode the next frame written by the server.
    pub async fn recv_frame(&mut self) -> Option<ServerFrame> {
        let text = self.recv().await?;
        codec::decode(&text).ok()
    }

    /// Take a frame if one is already buffered.
    pub fn try_recv(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }

    fn push(&self, event: PeerEvent) -> bool {
        self.inbound
            .as_ref()
            .map(|tx| tx.send(event).is_ok())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_reach_peer() {
        let (conn, mut peer) = pair();
        let (mut writer, _reader) = conn.split();

        writer.send(&ServerFrame::connected()).await.unwrap();
        assert!(peer.recv_frame().await.unwrap().is_connected());
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_peer_events_reach_reader() {
        let (conn, mut peer) = pair();
        let (_writer, mut reader) = conn.split();

        assert!(peer.send(Incoming::Text("hi".into())));
        assert_eq!(
            reader.recv().await.unwrap(),
            Some(Incoming::Text("hi".into()))
        );

        assert!(peer.fail_reads("reset"));
        assert!(matches!(
            reader.recv().await,
            Err(TransportError::ReceiveFailed(_))
        ));

        peer.disconnect();
        assert!(reader.recv().await.unwrap().is_none());
        assert!(!peer.send(Incoming::Ping));
    }

    #[tokio::test]
    async fn test_write_failures() {
        let (conn, peer) = pair();
        let (mut writer, _reader) = conn.split();

        peer.fail_writes();
        assert!(matches!(
            writer.send_text("x".into()).await,
            Err(TransportError::SendFailed(_))
        ));

        writer.close().await.unwrap();
        writer.close().await.unwrap();
        assert!(peer.is_closed());
        assert!(matches!(
            writer.send_text("x".into()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_stalled_writes_never_complete() {
        let (conn, mut peer) = pair();
        let (mut writer, _reader) = conn.split();

        peer.stall_writes();
        let write = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            writer.send_text("x".into()),
        );
        assert!(write.await.is_err());
        assert!(peer.try_recv().is_none());

        // Close still goes through.
        writer.close().await.unwrap();
        assert!(peer.is_closed());
    }
}
