//! # linkdrop-protocol
//!
//! Wire frames for the Linkdrop delivery channel.
//!
//! The delivery channel is server-to-device only. After the handshake the
//! server sends a single status frame and then one JSON object per link:
//!
//! ```text
//! {"message":"Connected"}
//! {"id":7,"user_id":1,"from_device_id":1,"to_device_id":2,"url":"https://example.com","created_at":"..."}
//! ```
//!
//! ## Example
//!
//! ```rust
//! use linkdrop_protocol::{codec, ServerFrame};
//!
//! let text = codec::encode(&ServerFrame::connected()).unwrap();
//! assert_eq!(text, r#"{"message":"Connected"}"#);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{DeviceId, Link, LinkId, ServerFrame, UserId, CONNECTED_MESSAGE};
