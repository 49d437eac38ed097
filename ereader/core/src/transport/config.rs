//! Transport Configuration
//!
//! Configuration types for selecting and configuring the connection driver.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Transport type selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportType {
    /// One-shot POST whose response body is an event stream
    ///
    /// Each request opens a fresh connection; nothing is reconnected.
    #[default]
    Stream,

    /// Persistent WebSocket reused across requests
    ///
    /// Reconnects after abnormal closure with a linearly growing delay.
    Socket,
}

impl TransportType {
    /// Parse a transport name as accepted by `EREADER_TRANSPORT`
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "stream" | "sse" => Some(Self::Stream),
            "socket" | "websocket" | "ws" => Some(Self::Socket),
            _ => None,
        }
    }
}

/// Transport configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Which driver to use
    pub transport: TransportType,

    /// Endpoint URL (e.g. `https://reader.example/api/stream`)
    pub endpoint: Option<String>,

    /// Socket connect timeout in milliseconds
    ///
    /// A socket that has not opened within this time is abandoned and
    /// reported as an error.
    pub connect_timeout_ms: u64,

    /// Reconnection attempts after abnormal socket closure (0 = no reconnection)
    pub reconnect_attempts: u32,

    /// Base reconnection interval in milliseconds
    ///
    /// Attempt `n` waits `n × reconnect_interval_ms`.
    pub reconnect_interval_ms: u64,

    /// Overall HTTP request timeout for the stream driver in milliseconds
    /// (0 = no timeout)
    pub request_timeout_ms: u64,

    /// Capacity of the driver → orchestrator event channel
    pub event_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport: TransportType::default(),
            endpoint: None,
            connect_timeout_ms: 30_000,
            reconnect_attempts: 3,
            reconnect_interval_ms: 2000,
            request_timeout_ms: 120_000,
            event_buffer: 100,
        }
    }
}

impl TransportConfig {
    /// Configuration for the one-shot stream driver
    pub fn stream(endpoint: impl Into<String>) -> Self {
        Self {
            transport: TransportType::Stream,
            endpoint: Some(endpoint.into()),
            ..Default::default()
        }
    }

    /// Configuration for the persistent socket driver
    pub fn socket(endpoint: impl Into<String>) -> Self {
        Self {
            transport: TransportType::Socket,
            endpoint: Some(endpoint.into()),
            ..Default::default()
        }
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `EREADER_TRANSPORT`: "stream", "sse", "socket", "websocket", "ws"
    /// - `EREADER_ENDPOINT`: Endpoint URL
    /// - `EREADER_CONNECT_TIMEOUT`: Socket connect timeout in ms
    /// - `EREADER_RECONNECT_ATTEMPTS`: Number of reconnection attempts
    /// - `EREADER_RECONNECT_INTERVAL`: Base reconnection interval in ms
    /// - `EREADER_REQUEST_TIMEOUT`: Stream request timeout in ms
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay environment variables onto this configuration
    ///
    /// Returns `true` if any variable was applied.
    pub fn apply_env(&mut self) -> bool {
        self.apply_env_with(|name| std::env::var(name).ok())
    }

    /// Overlay variables resolved by `var` onto this configuration
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_with(&mut self, var: impl Fn(&str) -> Option<String>) -> bool {
        let mut applied = false;

        if let Some(transport) = var("EREADER_TRANSPORT").and_then(|v| TransportType::parse(&v)) {
            self.transport = transport;
            applied = true;
        }
        if let Some(endpoint) = var("EREADER_ENDPOINT") {
            self.endpoint = Some(endpoint);
            applied = true;
        }
        if let Some(ms) = var("EREADER_CONNECT_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.connect_timeout_ms = ms;
            applied = true;
        }
        if let Some(n) = var("EREADER_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.reconnect_attempts = n;
            applied = true;
        }
        if let Some(ms) = var("EREADER_RECONNECT_INTERVAL").and_then(|v| v.parse().ok()) {
            self.reconnect_interval_ms = ms;
            applied = true;
        }
        if let Some(ms) = var("EREADER_REQUEST_TIMEOUT").and_then(|v| v.parse().ok()) {
            self.request_timeout_ms = ms;
            applied = true;
        }

        applied
    }

    /// Socket connect timeout
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay before reconnection attempt `attempt` (1-indexed)
    #[must_use]
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms.saturating_mul(u64::from(attempt)))
    }

    /// Stream request timeout, if any
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_ms > 0).then(|| Duration::from_millis(self.request_timeout_ms))
    }

    /// Check if this is a socket configuration
    #[must_use]
    pub fn is_socket(&self) -> bool {
        matches!(self.transport, TransportType::Socket)
    }
}
