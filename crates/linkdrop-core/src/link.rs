//! Outgoing link types.

use chrono::{DateTime, Utc};
use linkdrop_protocol::{DeviceId, Link, LinkId, UserId};
use serde::{Deserialize, Serialize};

/// A link as submitted by the sending device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLink {
    /// Device the link is sent from.
    pub from_device_id: DeviceId,
    /// Device the link is addressed to.
    pub to_device_id: DeviceId,
    /// The URL to share.
    pub url: String,
}

impl NewLink {
    /// Create a new outgoing link.
    #[must_use]
    pub fn new(from: DeviceId, to: DeviceId, url: impl Into<String>) -> Self {
        Self {
            from_device_id: from,
            to_device_id: to,
            url: url.into(),
        }
    }

    /// Validate the submitted fields.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.url.trim().is_empty() {
            return Err("url cannot be empty");
        }
        Ok(())
    }

    /// Stamp the link with its owner and creation time.
    #[must_use]
    pub fn into_record(self, user_id: UserId, created_at: DateTime<Utc>) -> LinkRecord {
        LinkRecord {
            user_id,
            from_device_id: self.from_device_id,
            to_device_id: self.to_device_id,
            url: self.url,
            created_at,
        }
    }
}

/// A link ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRecord {
    /// Sending user.
    pub user_id: UserId,
    /// Source device.
    pub from_device_id: DeviceId,
    /// Target device.
    pub to_device_id: DeviceId,
    /// The URL.
    pub url: String,
    /// Server-assigned creation time.
    pub created_at: DateTime<Utc>,
}

impl LinkRecord {
    /// Attach the storage-assigned id.
    #[must_use]
    pub fn into_link(self, id: LinkId) -> Link {
        Link {
            id,
            user_id: self.user_id,
            from_device_id: self.from_device_id,
            to_device_id: self.to_device_id,
            url: self.url,
            created_at: self.created_at,
        }
    }
}
