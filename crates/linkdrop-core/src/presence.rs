//! Presence tracking for Linkdrop.
//!
//! The registry maps `user -> device -> session handle` for every device that
//! currently holds a delivery session. It is the only shared mutable state in
//! the delivery path; sessions and the router receive it explicitly.

use crate::session::{CloseReason, SessionHandle, SessionId};
use dashmap::DashMap;
use linkdrop_protocol::{DeviceId, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

/// The registry key: a device namespaced by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    /// Owning user.
    pub user: UserId,
    /// Device, unique per user.
    pub device: DeviceId,
}

impl DeviceKey {
    /// Create a new key.
    #[must_use]
    pub const fn new(user: UserId, device: DeviceId) -> Self {
        Self { user, device }
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user, self.device)
    }
}

/// What happens when a device opens a second session while one is live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupersedePolicy {
    /// Overwrite the entry and leave the old session running, unreachable.
    Replace,
    /// Overwrite the entry and tell the old session to close.
    #[default]
    CloseExisting,
    /// Refuse the new session while the old one is live.
    RejectNew,
}

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The device already has a live session.
    #[error("Device already connected: {0}")]
    AlreadyConnected(DeviceKey),
}

/// Presence registry operations.
pub trait Presence: Send + Sync {
    /// Insert the handle under its key.
    ///
    /// Returns the superseded handle, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::AlreadyConnected`] when the policy refuses to
    /// supersede a live session.
    fn register(&self, handle: SessionHandle) -> Result<Option<SessionHandle>, RegistryError>;

    /// Remove the entry for `key`, but only if it still belongs to `session`.
    ///
    /// Returns `true` if an entry was removed.
    fn unregister(&self, key: DeviceKey, session: SessionId) -> bool;

    /// Find the live handle for `key`.
    fn lookup(&self, key: DeviceKey) -> Option<SessionHandle>;
}

/// The in-process presence registry.
///
/// Rows are sharded per user; each user's device map is only touched while
/// that user's shard lock is held.
pub struct PresenceRegistry {
    users: DashMap<UserId, HashMap<DeviceId, SessionHandle>>,
    policy: SupersedePolicy,
}

impl PresenceRegistry {
    /// Create a registry with the default supersede policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(SupersedePolicy::default())
    }

    /// Create a registry with a specific supersede policy.
    #[must_use]
    pub fn with_policy(policy: SupersedePolicy) -> Self {
        info!(?policy, "Creating presence registry");
        Self {
            users: DashMap::new(),
            policy,
        }
    }

    /// Check whether a device has a live session.
    #[must_use]
    pub fn is_online(&self, key: DeviceKey) -> bool {
        self.lookup(key).is_some()
    }

    /// Devices of `user` with a live session, sorted.
    #[must_use]
    pub fn online_devices(&self, user: UserId) -> Vec<DeviceId> {
        let mut devices: Vec<DeviceId> = self
            .users
            .get(&user)
            .map(|row| row.keys().copied().collect())
            .unwrap_or_default();
        devices.sort_unstable();
        devices
    }

    /// Whether a user row exists at all.
    #[must_use]
    pub fn has_user(&self, user: UserId) -> bool {
        self.users.contains_key(&user)
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            user_count: self.users.len(),
            session_count: self.users.iter().map(|row| row.len()).sum(),
        }
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Presence for PresenceRegistry {
    fn register(&self, handle: SessionHandle) -> Result<Option<SessionHandle>, RegistryError> {
        let key = handle.key();
        let mut row = self.users.entry(key.user).or_default();

        if self.policy == SupersedePolicy::RejectNew {
            if let Some(existing) = row.get(&key.device) {
                if !existing.is_closed() {
                    return Err(RegistryError::AlreadyConnected(key));
                }
            }
        }

        let session = handle.id();
        let previous = row.insert(key.device, handle);
        let devices = row.len();
        drop(row);

        if let Some(prev) = &previous {
            match self.policy {
                SupersedePolicy::CloseExisting => {
                    prev.close(CloseReason::Superseded);
                    debug!(key = %key, old = %prev.id(), new = %session, "Superseded session closed");
                }
                SupersedePolicy::Replace | SupersedePolicy::RejectNew => {
                    debug!(key = %key, old = %prev.id(), new = %session, "Superseded session replaced");
                }
            }
        }

        debug!(key = %key, session = %session, devices, "Registered");
        Ok(previous)
    }

    fn unregister(&self, key: DeviceKey, session: SessionId) -> bool {
        let removed = match self.users.get_mut(&key.user) {
            Some(mut row) => {
                if row.get(&key.device).map(SessionHandle::id) == Some(session) {
                    row.remove(&key.device);
                    true
                } else {
                    false
                }
            }
            None => false,
        };

        if removed {
            // Re-checked under the shard lock, a concurrent register wins.
            let pruned = self
                .users
                .remove_if(&key.user, |_, row| row.is_empty())
                .is_some();
            debug!(key = %key, session = %session, pruned, "Unregistered");
        }

        removed
    }

    fn lookup(&self, key: DeviceKey) -> Option<SessionHandle> {
        self.users
            .get(&key.user)
            .and_then(|row| row.get(&key.device).cloned())
    }
}

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    /// Users with at least one live device.
    pub user_count: usize,
    /// Live sessions across all users.
    pub session_count: usize,
}
