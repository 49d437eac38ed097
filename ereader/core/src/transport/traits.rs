//! Transport Traits
//!
//! The seam between the orchestrator and the two connection drivers.
//!
//! A driver owns exactly one transport resource at a time and reports
//! everything that happens on it as [`DriverEvent`]s through an
//! [`EventSink`]. Transport failures never escape a driver as errors once a
//! request has been dispatched; they are reported as
//! [`DriverEventKind::Failure`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{GenerationRequest, ProtocolMessage};
use crate::state::{ConnectionState, Epoch};

/// Errors that can occur while dispatching a request
#[derive(Debug, Error)]
pub enum TransportError {
    /// No endpoint URL was configured
    #[error("{0} URL not provided")]
    MissingEndpoint(&'static str),

    /// Could not reach the endpoint
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Endpoint answered with a non-success status
    #[error("HTTP {status}: {reason}")]
    HttpStatus {
        /// Status code
        status: u16,
        /// Reason phrase or body excerpt
        reason: String,
    },

    /// The socket did not open in time
    #[error("Connection timeout after {0:?}")]
    Timeout(Duration),

    /// Connection was closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to hand a frame to the transport
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Request could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What happened on a transport
#[derive(Clone, Debug, PartialEq)]
pub enum DriverEventKind {
    /// Connectivity changed
    Connection(ConnectionState),
    /// A protocol message was decoded
    Message(ProtocolMessage),
    /// The transport failed; the text is user-visible
    Failure(String),
}

/// A driver event tagged with the epoch it belongs to
#[derive(Clone, Debug, PartialEq)]
pub struct DriverEvent {
    /// Epoch current when the event was produced
    pub epoch: Epoch,
    /// What happened
    pub kind: DriverEventKind,
}

/// Ordered channel from a driver to its orchestrator
///
/// Cloned into every task a driver spawns. The shared epoch counter is owned
/// by the orchestrator; drivers only read it.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::Sender<DriverEvent>,
    epoch: Arc<AtomicU64>,
}

impl EventSink {
    /// Create a sink over `tx` that tags events with `epoch`
    #[must_use]
    pub fn new(tx: mpsc::Sender<DriverEvent>, epoch: Arc<AtomicU64>) -> Self {
        Self { tx, epoch }
    }

    /// Epoch the orchestrator is currently in
    #[must_use]
    pub fn current_epoch(&self) -> Epoch {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Emit an event under a specific epoch
    ///
    /// Returns `false` once the orchestrator is gone.
    pub async fn emit_at(&self, epoch: Epoch, kind: DriverEventKind) -> bool {
        self.tx.send(DriverEvent { epoch, kind }).await.is_ok()
    }

    /// Emit an event under the current epoch
    pub async fn emit(&self, kind: DriverEventKind) -> bool {
        self.emit_at(self.current_epoch(), kind).await
    }
}

/// Connection driver strategy
///
/// Two implementations exist: a one-shot event stream over HTTP and a
/// persistent WebSocket. The orchestrator only talks to this trait.
#[async_trait]
pub trait GenerationTransport: Send + Sync {
    /// Driver name for logging (e.g. "stream", "socket")
    fn name(&self) -> &'static str;

    /// Configured endpoint URL
    fn endpoint(&self) -> Option<&str>;

    /// Configured endpoint URL, or the configuration error to surface
    fn require_endpoint(&self) -> Result<&str, TransportError> {
        self.endpoint()
            .ok_or(TransportError::MissingEndpoint(self.name()))
    }

    /// Open a persistent transport ahead of any request
    ///
    /// One-shot drivers have nothing to open.
    async fn connect(&mut self, _sink: EventSink) -> Result<(), TransportError> {
        Ok(())
    }

    /// Hand a request to the transport
    ///
    /// Returns once the request is dispatched (or queued for dispatch), not
    /// once generation completes. Errors are limited to problems detected
    /// before any I/O is started.
    async fn dispatch(
        &mut self,
        request: &GenerationRequest,
        sink: EventSink,
    ) -> Result<(), TransportError>;

    /// Abort the in-flight attempt and release the transport resource
    ///
    /// After this returns the driver no longer owns a live resource.
    async fn cancel(&mut self);
}
