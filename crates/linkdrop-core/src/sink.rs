//! Persistence sink interface.
//!
//! Durable storage is a side effect of delivery, never part of the routing
//! decision. The server provides a SQLite implementation; [`MemorySink`]
//! serves tests and benchmarks.

use crate::link::LinkRecord;
use async_trait::async_trait;
use linkdrop_protocol::{DeviceId, Link, LinkId, UserId};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

/// Sink errors.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The backing store failed.
    #[error("storage failure: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The sink refused the write.
    #[error("write rejected: {0}")]
    Rejected(String),
}

/// Durable record of links and device activity.
#[async_trait]
pub trait LinkSink: Send + Sync {
    /// Store a link, returning its id.
    async fn record_link(&self, link: &LinkRecord) -> Result<LinkId, SinkError>;

    /// Update the last-seen time of a user's device.
    async fn touch_device_last_seen(
        &self,
        device: DeviceId,
        user: UserId,
    ) -> Result<(), SinkError>;
}

/// In-memory sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    links: Mutex<Vec<Link>>,
    touches: Mutex<Vec<(DeviceId, UserId)>>,
    next_id: AtomicI64,
    fail_links: AtomicBool,
    fail_touches: AtomicBool,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `record_link` fail until reset.
    pub fn fail_links(&self, fail: bool) {
        self.fail_links.store(fail, Ordering::SeqCst);
    }

    /// Make `touch_device_last_seen` fail until reset.
    pub fn fail_touches(&self, fail: bool) {
        self.fail_touches.store(fail, Ordering::SeqCst);
    }

    /// Links recorded so far.
    #[must_use]
    pub fn links(&self) -> Vec<Link> {
        self.links.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// `(device, user)` pairs touched so far.
    #[must_use]
    pub fn touches(&self) -> Vec<(DeviceId, UserId)> {
        self.touches.lock().map(|t| t.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LinkSink for MemorySink {
    async fn record_link(&self, link: &LinkRecord) -> Result<LinkId, SinkError> {
        if self.fail_links.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("link writes disabled".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let mut links = self
            .links
            .lock()
            .map_err(|_| SinkError::Rejected("poisoned".into()))?;
        links.push(link.clone().into_link(id));
        Ok(id)
    }

    async fn touch_device_last_seen(
        &self,
        device: DeviceId,
        user: UserId,
    ) -> Result<(), SinkError> {
        if self.fail_touches.load(Ordering::SeqCst) {
            return Err(SinkError::Rejected("last_seen writes disabled".into()));
        }

        self.touches
            .lock()
            .map_err(|_| SinkError::Rejected("poisoned".into()))?
            .push((device, user));
        Ok(())
    }
}
