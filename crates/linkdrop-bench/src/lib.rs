//! Shared fixtures for the Linkdrop benchmarks.

use async_trait::async_trait;
use linkdrop_core::{
    DeviceId, DeviceKey, LinkId, LinkRecord, LinkRouter, LinkSink, Presence, PresenceRegistry,
    SessionHandle, SessionInbox, SinkError, UserId,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// A sink that only hands out ids.
#[derive(Debug, Default)]
pub struct NullSink {
    next_id: AtomicI64,
}

#[async_trait]
impl LinkSink for NullSink {
    async fn record_link(&self, _link: &LinkRecord) -> Result<LinkId, SinkError> {
        Ok(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn touch_device_last_seen(
        &self,
        _device: DeviceId,
        _user: UserId,
    ) -> Result<(), SinkError> {
        Ok(())
    }
}

/// A router over a populated registry.
pub struct Fixture {
    pub router: LinkRouter,
    pub registry: Arc<PresenceRegistry>,
    pub sink: Arc<NullSink>,
    /// Inboxes of every registered device, kept alive so pushes succeed.
    pub inboxes: Vec<SessionInbox>,
}

impl Fixture {
    /// Register `devices` devices for each of `users` users.
    ///
    /// User and device ids start at 1.
    #[must_use]
    pub fn new(users: i64, devices: i64) -> Self {
        let registry = Arc::new(PresenceRegistry::new());
        let sink = Arc::new(NullSink::default());
        let router = LinkRouter::new(registry.clone(), sink.clone());

        let mut inboxes = Vec::with_capacity((users * devices) as usize);
        for user in 1..=users {
            for device in 1..=devices {
                let (handle, inbox) = SessionHandle::new(DeviceKey::new(user, device));
                if registry.register(handle).is_ok() {
                    inboxes.push(inbox);
                }
            }
        }

        Self {
            router,
            registry,
            sink,
            inboxes,
        }
    }

    /// Discard everything queued so far.
    pub fn drain(&mut self) {
        for inbox in &mut self.inboxes {
            while inbox.try_recv().is_some() {}
        }
    }
}
