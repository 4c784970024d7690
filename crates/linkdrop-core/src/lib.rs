//! # linkdrop-core
//!
//! Device presence and real-time link delivery for Linkdrop.
//!
//! - **Presence** - which (user, device) pairs currently have a live session
//! - **Session** - one delivery session per connected device
//! - **Router** - persists a link, then pushes it to the target's session
//! - **Sink** - the durable storage the router and sessions write through
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  record   ┌─────────────┐
//! │   Router    │──────────▶│    Sink     │
//! └─────────────┘           └─────────────┘
//!        │ lookup                  ▲ last seen
//!        ▼                         │
//! ┌─────────────┐  register ┌─────────────┐   frames   ┌────────┐
//! │  Presence   │◀──────────│   Session   │───────────▶│ Device │
//! └─────────────┘           └─────────────┘            └────────┘
//!        │ handle.push()          ▲
//!        └────────────────────────┘
//! ```
//!
//! The router never writes to a transport. It hands the encoded frame to the
//! target session's queue and the session task performs the write.

pub mod link;
pub mod presence;
pub mod router;
pub mod session;
pub mod sink;

pub use link::{LinkRecord, NewLink};
pub use linkdrop_protocol::{DeviceId, Link, LinkId, UserId};
pub use presence::{
    DeviceKey, Presence, PresenceRegistry, RegistryError, RegistryStats, SupersedePolicy,
};
pub use router::{Delivery, LinkRouter, RouterError, SendOutcome};
pub use session::{
    parse_device_id, CloseReason, DeliverySession, SessionError, SessionHandle, SessionId,
    SessionInbox, SessionState, DEFAULT_QUEUE_CAPACITY,
};
pub use sink::{LinkSink, MemorySink, SinkError};
