//! # linkdrop-transport
//!
//! Connection abstraction for Linkdrop delivery sessions.
//!
//! A delivery session needs two things from its transport: a way to write
//! frames to the device and a way to notice that the device went away. Every
//! transport therefore splits into a [`FrameWriter`] and a [`FrameReader`]
//! that the session drives from a single task.
//!
//! - **WebSocket** - axum WebSocket adapter used by the server
//! - **Memory** - channel-backed connection with a scriptable peer, for tests
//!
//! ```rust,ignore
//! use linkdrop_transport::{Connection, FrameReader};
//!
//! async fn wait_for_close(conn: impl Connection) {
//!     let (_writer, mut reader) = conn.split();
//!     while let Ok(Some(_)) = reader.recv().await {}
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryConnection, MemoryPeer};
pub use traits::{Connection, FrameReader, FrameWriter, Incoming, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnection;
