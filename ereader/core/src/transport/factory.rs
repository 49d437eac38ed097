//! Transport Factory
//!
//! Picks the connection driver named by a [`TransportConfig`]. The
//! orchestrator only ever sees the boxed trait object.

use super::{
    config::{TransportConfig, TransportType},
    sse::SseTransport,
    traits::GenerationTransport,
    websocket::SocketTransport,
};

/// Create the connection driver selected by `config`
///
/// A missing endpoint is not an error here; it is reported when the first
/// request is dispatched so that `start` can return `false`.
///
/// # Example
///
/// ```ignore
/// use ereader_core::transport::{create_transport, TransportConfig};
///
/// let config = TransportConfig::socket("ws://localhost:3000/api/ws");
/// let transport = create_transport(&config);
/// assert_eq!(transport.name(), "socket");
/// ```
#[must_use]
pub fn create_transport(config: &TransportConfig) -> Box<dyn GenerationTransport> {
    match config.transport {
        TransportType::Stream => Box::new(SseTransport::from_config(config)),
        TransportType::Socket => Box::new(SocketTransport::from_config(config)),
    }
}
