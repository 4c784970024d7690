//! Metrics collection and export for Linkdrop.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use linkdrop_core::{CloseReason, Delivery};
use linkdrop_transport::{Connection, FrameWriter, TransportError};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names.
pub mod names {
    pub const SESSIONS_TOTAL: &str = "linkdrop_sessions_total";
    pub const SESSIONS_ACTIVE: &str = "linkdrop_sessions_active";
    pub const SESSIONS_CLOSED: &str = "linkdrop_sessions_closed_total";
    pub const LINKS_TOTAL: &str = "linkdrop_links_total";
    pub const FRAMES_BYTES: &str = "linkdrop_frames_bytes";
    pub const ERRORS_TOTAL: &str = "linkdrop_errors_total";
}

/// Describe every metric to the installed recorder.
///
/// Call after the recorder is installed, or the descriptions are lost.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::SESSIONS_TOTAL,
        "Total number of delivery sessions since server start"
    );
    metrics::describe_gauge!(
        names::SESSIONS_ACTIVE,
        "Current number of open delivery sessions"
    );
    metrics::describe_counter!(names::SESSIONS_CLOSED, "Closed sessions by reason");
    metrics::describe_counter!(names::LINKS_TOTAL, "Stored links by delivery outcome");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total bytes of frames sent to devices");
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new session.
pub fn record_session_opened() {
    counter!(names::SESSIONS_TOTAL).increment(1);
    gauge!(names::SESSIONS_ACTIVE).increment(1.0);
}

/// Record a session end.
pub fn record_session_closed(reason: CloseReason) {
    gauge!(names::SESSIONS_ACTIVE).decrement(1.0);
    counter!(names::SESSIONS_CLOSED, "reason" => reason.as_str()).increment(1);
}

/// Record the delivery outcome of a stored link.
pub fn record_link(delivery: Delivery) {
    let outcome = match delivery {
        Delivery::Pushed => "delivered",
        Delivery::Offline => "offline",
        Delivery::Dropped => "failed",
    };
    counter!(names::LINKS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record bytes written to a device.
pub fn record_frame(bytes: usize) {
    counter!(names::FRAMES_BYTES).increment(bytes as u64);
}

/// Record an error.
pub fn record_error(error_type: &str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type.to_string()).increment(1);
}

/// A connection whose writer counts outbound bytes.
pub struct Metered<C>(pub C);

impl<C: Connection> Connection for Metered<C> {
    type Writer = MeteredWriter<C::Writer>;
    type Reader = C::Reader;

    fn split(self) -> (Self::Writer, Self::Reader) {
        let (writer, reader) = self.0.split();
        (MeteredWriter(writer), reader)
    }

    fn remote_addr(&self) -> Option<String> {
        self.0.remote_addr()
    }
}

/// Writer half of a [`Metered`] connection.
pub struct MeteredWriter<W>(W);

#[async_trait]
impl<W: FrameWriter> FrameWriter for MeteredWriter<W> {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        let len = text.len();
        match self.0.send_text(text).await {
            Ok(()) => {
                record_frame(len);
                Ok(())
            }
            Err(e) => {
                record_error("write");
                Err(e)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0.close().await
    }
}

/// Metrics guard for one session. Records the close reason on drop, or
/// `PeerClosed` if the session task never reported one.
pub struct SessionMetricsGuard {
    reason: Option<CloseReason>,
}

impl SessionMetricsGuard {
    /// Create a new metrics guard, recording a session.
    #[must_use]
    pub fn new() -> Self {
        record_session_opened();
        Self { reason: None }
    }

    /// Set the reason reported when the guard drops.
    pub fn closed(&mut self, reason: CloseReason) {
        self.reason = Some(reason);
    }
}

impl Default for SessionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionMetricsGuard {
    fn drop(&mut self) {
        record_session_closed(self.reason.unwrap_or(CloseReason::PeerClosed));
    }
}
