//! Frame types for the delivery channel.
//!
//! Every frame is a single JSON object sent as one WebSocket text message.
//! Frames are distinguished by shape rather than by a tag field, which keeps
//! the link frame identical to the stored link record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An authenticated user identifier.
pub type UserId = i64;

/// A device identifier, unique per user.
pub type DeviceId = i64;

/// A durable link identifier assigned by storage.
pub type LinkId = i64;

/// Status text sent once a delivery session is active.
pub const CONNECTED_MESSAGE: &str = "Connected";

/// A link sent from one of a user's devices to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    /// Storage-assigned identifier.
    pub id: LinkId,
    /// Owner of both devices.
    pub user_id: UserId,
    /// Device the link was sent from.
    pub from_device_id: DeviceId,
    /// Device the link is addressed to.
    pub to_device_id: DeviceId,
    /// The shared URL, untouched.
    pub url: String,
    /// Server-assigned creation time.
    pub created_at: DateTime<Utc>,
}

/// A server-to-device frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    /// Status notice, e.g. `{"message":"Connected"}`.
    Status {
        /// Human-readable status.
        message: String,
    },

    /// Terminal error notice sent before the server closes the session.
    Error {
        /// Human-readable error.
        error: String,
    },

    /// A delivered link.
    Link(Link),
}

impl ServerFrame {
    /// The acknowledgement sent when a session becomes active.
    #[must_use]
    pub fn connected() -> Self {
        ServerFrame::Status {
            message: CONNECTED_MESSAGE.to_string(),
        }
    }

    /// Create an error frame.
    #[must_use]
    pub fn error(error: impl Into<String>) -> Self {
        ServerFrame::Error {
            error: error.into(),
        }
    }

    /// Create a link frame.
    #[must_use]
    pub fn link(link: Link) -> Self {
        ServerFrame::Link(link)
    }

    /// Whether this is the session acknowledgement frame.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, ServerFrame::Status { message } if message == CONNECTED_MESSAGE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_link() -> Link {
        Link {
            id: 7,
            user_id: 1,
            from_device_id: 1,
            to_device_id: 2,
            url: "https://example.com".to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_connected_frame_shape() {
        let value = serde_json::to_value(ServerFrame::connected()).unwrap();
        assert_eq!(value, serde_json::json!({"message": "Connected"}));
        assert!(ServerFrame::connected().is_connected());
        assert!(!ServerFrame::error("x").is_connected());
    }

    #[test]
    fn test_link_frame_fields() {
        let value = serde_json::to_value(ServerFrame::link(sample_link())).unwrap();
        let obj = value.as_object().unwrap();

        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            ["created_at", "from_device_id", "id", "to_device_id", "url", "user_id"]
        );
        assert_eq!(obj["url"], "https://example.com");
        assert_eq!(obj["to_device_id"], 2);
    }
}
