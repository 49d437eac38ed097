//! Connection Drivers
//!
//! Two interchangeable ways of reaching the generation backend:
//! - `Stream`: one `POST` per request, response read as `data: <json>` lines
//! - `Socket`: one persistent WebSocket, one JSON text frame per message
//!
//! # Design Philosophy
//!
//! Both drivers implement [`GenerationTransport`] and report everything that
//! happens on the wire as [`DriverEvent`]s. The orchestrator never sees a
//! transport exception; failures arrive as [`DriverEventKind::Failure`] and
//! are turned into user-visible errors by the state machine.

pub mod config;
pub mod factory;
pub mod frame;
pub mod sse;
pub mod traits;
pub mod websocket;

// Re-exports for convenience
pub use config::{TransportConfig, TransportType};
pub use factory::create_transport;
pub use frame::{EventLineDecoder, MAX_LINE_SIZE};
pub use sse::{SseTransport, STREAM_ENDED};
pub use traits::{
    DriverEvent, DriverEventKind, EventSink, GenerationTransport, TransportError,
};
pub use websocket::{socket_url, SocketTransport};
