//! Link router for Linkdrop.
//!
//! The router persists every submitted link and then, best effort, hands it
//! to the target device's live session. The routing decision is made once,
//! at send time. Nothing is queued for devices that are offline.

use crate::link::NewLink;
use crate::presence::{DeviceKey, Presence};
use crate::session::SessionError;
use crate::sink::{LinkSink, SinkError};
use chrono::Utc;
use linkdrop_protocol::{codec, Link, ServerFrame, UserId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    /// The submitted link is malformed.
    #[error("Invalid link: {0}")]
    InvalidLink(&'static str),

    /// The link could not be stored; nothing was delivered.
    #[error("Failed to store link: {0}")]
    Persistence(#[from] SinkError),
}

/// What happened to a stored link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on the target's live session.
    Pushed,
    /// The target had no live session.
    Offline,
    /// The target's session ended before the push, its queue was full, or
    /// the frame could not be encoded.
    Dropped,
}

impl Delivery {
    /// Label used in logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Delivery::Pushed => "pushed",
            Delivery::Offline => "offline",
            Delivery::Dropped => "dropped",
        }
    }
}

/// Result of a successful send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// The stored link.
    pub link: Link,
    /// Delivery attempt result.
    pub delivery: Delivery,
}

/// Routes links to live device sessions.
#[derive(Clone)]
pub struct LinkRouter {
    presence: Arc<dyn Presence>,
    sink: Arc<dyn LinkSink>,
}

impl LinkRouter {
    /// Create a router over a registry and a sink.
    #[must_use]
    pub fn new(presence: Arc<dyn Presence>, sink: Arc<dyn LinkSink>) -> Self {
        Self { presence, sink }
    }

    /// Store a link from `user` and push it to the target device if it is
    /// connected right now.
    ///
    /// A missing or failing target is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the link is malformed or cannot be stored. No
    /// delivery is attempted in either case.
    pub async fn send_link(&self, user: UserId, link: NewLink) -> Result<SendOutcome, RouterError> {
        link.validate().map_err(RouterError::InvalidLink)?;

        let record = link.into_record(user, Utc::now());
        let id = self.sink.record_link(&record).await?;
        let link = record.into_link(id);

        let delivery = self.route(&link);
        debug!(
            link = link.id,
            user = link.user_id,
            from = link.from_device_id,
            to = link.to_device_id,
            delivery = delivery.as_str(),
            "Link sent"
        );

        Ok(SendOutcome { link, delivery })
    }

    /// Push a stored link to its target session, if any.
    fn route(&self, link: &Link) -> Delivery {
        let key = DeviceKey::new(link.user_id, link.to_device_id);

        let Some(handle) = self.presence.lookup(key) else {
            trace!(key = %key, "Target offline");
            return Delivery::Offline;
        };

        let text = match codec::encode(&ServerFrame::link(link.clone())) {
            Ok(text) => text,
            Err(e) => {
                warn!(key = %key, link = link.id, error = %e, "Failed to encode link frame");
                return Delivery::Dropped;
            }
        };

        match handle.push(text) {
            Ok(()) => Delivery::Pushed,
            Err(SessionError::Backlogged) => {
                warn!(key = %key, session = %handle.id(), link = link.id, "Session backlogged, link dropped");
                Delivery::Dropped
            }
            Err(e) => {
                warn!(key = %key, session = %handle.id(), error = %e, "Push to closing session failed");
                Delivery::Dropped
            }
        }
    }
}
