//! Generation Client
//!
//! The single entry point a surface uses to request generations.
//!
//! A [`GenerationClient`] owns one connection driver and one
//! [`GenerationStateMachine`]. Driver events flow through an ordered channel
//! into a pump task that applies them to the machine one at a time, so
//! messages of an attempt are applied in exactly the order the transport
//! delivered them.
//!
//! # Example
//!
//! ```ignore
//! use ereader_core::{GenerationClient, GenerationRequest, GenerationUpdate, TransportConfig};
//!
//! let mut client = GenerationClient::from_config(&TransportConfig::stream(url));
//! let mut updates = client.subscribe();
//!
//! if client.start(&GenerationRequest::new(context).with_tags(["romance"])).await {
//!     while let Some(update) = updates.recv().await {
//!         if let GenerationUpdate::Finished(outcome) = update {
//!             println!("{outcome:?}");
//!             break;
//!         }
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::protocol::GenerationRequest;
use crate::state::{
    ConnectionState, Epoch, GenerationSnapshot, GenerationStateMachine, GenerationUpdate,
};
use crate::transport::{create_transport, EventSink, GenerationTransport, TransportConfig};

/// Request orchestrator
///
/// At most one attempt is in flight per client. `start` while an attempt is
/// active returns `false` for both drivers; the socket driver additionally
/// holds a request until its socket is open.
///
/// Must be created inside a tokio runtime.
pub struct GenerationClient {
    transport: Box<dyn GenerationTransport>,
    machine: Arc<Mutex<GenerationStateMachine>>,
    epoch: Arc<AtomicU64>,
    sink: EventSink,
    pump: JoinHandle<()>,
}

impl GenerationClient {
    /// Create a client around an existing driver
    pub fn new(transport: Box<dyn GenerationTransport>, config: &TransportConfig) -> Self {
        let machine = Arc::new(Mutex::new(GenerationStateMachine::new()));
        let epoch = Arc::new(AtomicU64::new(0));
        let (tx, mut rx) = mpsc::channel(config.event_buffer.max(1));

        let pump = {
            let machine = Arc::clone(&machine);
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    machine.lock().handle(event);
                }
            })
        };

        tracing::debug!(transport = transport.name(), "Generation client created");

        Self {
            transport,
            machine,
            sink: EventSink::new(tx, Arc::clone(&epoch)),
            epoch,
            pump,
        }
    }

    /// Create a client with the driver selected by `config`
    #[must_use]
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(create_transport(config), config)
    }

    /// Start a generation attempt
    ///
    /// Returns once the request has been handed to the driver, not once it
    /// completes. Returns `false` when no endpoint is configured, when an
    /// attempt is already in flight, or when the request could not be handed
    /// over; the reason is delivered to subscribers as an error.
    pub async fn start(&mut self, request: &GenerationRequest) -> bool {
        if let Err(err) = self.transport.require_endpoint() {
            tracing::warn!(transport = self.transport.name(), error = %err, "Cannot start generation");
            self.machine.lock().notify_error(err.to_string());
            return false;
        }

        let epoch = {
            let mut machine = self.machine.lock();
            if machine.is_active() {
                tracing::debug!(
                    transport = self.transport.name(),
                    "Generation already in flight, rejecting start"
                );
                return false;
            }
            let epoch = self.next_epoch();
            machine.begin_attempt(epoch);
            epoch
        };

        match self.transport.dispatch(request, self.sink.clone()).await {
            Ok(()) => {
                tracing::info!(
                    transport = self.transport.name(),
                    epoch,
                    tags = request.tags.as_ref().map_or(0, Vec::len),
                    "Generation started"
                );
                true
            }
            Err(err) => {
                tracing::warn!(epoch, error = %err, "Failed to dispatch generation request");
                self.machine.lock().fail(err.to_string());
                false
            }
        }
    }

    /// Abort the in-flight attempt and release the transport
    ///
    /// Moves to `disconnected` without reporting an error. Accumulated
    /// content stays available for inspection.
    pub async fn cancel(&mut self) {
        let epoch = self.next_epoch();
        self.machine.lock().cancel(epoch);
        self.transport.cancel().await;
        tracing::info!(transport = self.transport.name(), "Generation cancelled");
    }

    /// Clear generated content and progress, keeping the connection
    pub fn reset(&self) {
        self.machine.lock().reset();
    }

    /// Open a persistent transport ahead of the first request
    ///
    /// A no-op for the stream driver.
    pub async fn connect(&mut self) -> bool {
        match self.transport.connect(self.sink.clone()).await {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to open transport");
                self.machine.lock().notify_error(err.to_string());
                false
            }
        }
    }

    /// Subscribe to state changes
    ///
    /// Updates arrive in the order they were applied. None are dropped for
    /// a slow reader.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<GenerationUpdate> {
        self.machine.lock().subscribe()
    }

    /// Copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> GenerationSnapshot {
        self.machine.lock().snapshot()
    }

    /// Current connection state
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.machine.lock().connection()
    }

    /// Accumulated generated text
    #[must_use]
    pub fn content(&self) -> String {
        self.machine.lock().content().to_string()
    }

    /// Whether an attempt is in flight
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.machine.lock().is_active()
    }

    /// Name of the underlying driver
    #[must_use]
    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    fn next_epoch(&self) -> Epoch {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }
}

impl Drop for GenerationClient {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
