//! One-shot Event Stream Transport
//!
//! Each request is a single `POST` whose body is the encoded
//! [`GenerationRequest`]; the response body is read as an unbounded byte
//! stream of `data: <json>` lines.
//!
//! # Lifecycle
//!
//! ```text
//! dispatch ─► POST ─► 2xx ─► connected ─► pump lines ─┬─► terminal message (stop)
//!               │       │                              ├─► end of body ─► failure
//!               │       └─► non-2xx ─► failure         └─► read error ─► failure
//!               └─► network error ─► failure
//! ```
//!
//! Nothing is reconnected. A broken stream is reported once and the attempt
//! ends; retrying is a new `start`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use tokio::task::JoinHandle;

use super::config::TransportConfig;
use super::frame::EventLineDecoder;
use super::traits::{DriverEventKind, EventSink, GenerationTransport, TransportError};
use crate::protocol::{encode_request, GenerationRequest};
use crate::state::{ConnectionState, Epoch};

/// Failure reported when the body ends before `complete` or `error`
pub const STREAM_ENDED: &str = "Stream ended before completion";

/// Event stream transport
pub struct SseTransport {
    endpoint: Option<String>,
    http_client: reqwest::Client,
    /// Pump for the current attempt
    task: Option<JoinHandle<()>>,
}

impl SseTransport {
    /// Create a transport posting to `endpoint`
    ///
    /// `request_timeout` bounds the whole request including the body read.
    pub fn new(endpoint: Option<String>, request_timeout: Option<Duration>) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to build HTTP client, using defaults");
            reqwest::Client::new()
        });

        Self {
            endpoint,
            http_client,
            task: None,
        }
    }

    /// Create from `TransportConfig`
    #[must_use]
    pub fn from_config(config: &TransportConfig) -> Self {
        Self::new(config.endpoint.clone(), config.request_timeout())
    }

    /// Whether a pump for an earlier request is still running
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                task.abort();
            }
        }
    }
}

#[async_trait]
impl GenerationTransport for SseTransport {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    async fn dispatch(
        &mut self,
        request: &GenerationRequest,
        sink: EventSink,
    ) -> Result<(), TransportError> {
        let url = self.require_endpoint()?.to_string();
        let body = encode_request(request)?;

        // A pump still alive here has already delivered its terminal message
        if self.is_busy() {
            tracing::debug!("Dropping previous stream pump");
        }
        self.abort_task();

        let epoch = sink.current_epoch();
        tracing::debug!(url = %url, epoch, bytes = body.len(), "Dispatching stream request");

        let client = self.http_client.clone();
        self.task = Some(tokio::spawn(pump(client, url, body, sink, epoch)));
        Ok(())
    }

    async fn cancel(&mut self) {
        if self.is_busy() {
            tracing::info!("Cancelling stream request");
        }
        self.abort_task();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.abort_task();
    }
}

/// Read one response to the end, forwarding every decoded message
async fn pump(client: reqwest::Client, url: String, body: String, sink: EventSink, epoch: Epoch) {
    sink.emit_at(epoch, DriverEventKind::Connection(ConnectionState::Connecting))
        .await;

    let response = match client
        .post(&url)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .body(body)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, url = %url, "Stream request failed");
            let err = TransportError::ConnectionFailed(e.to_string());
            sink.emit_at(epoch, DriverEventKind::Failure(err.to_string()))
                .await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let err = TransportError::HttpStatus {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
        };
        tracing::warn!(status = status.as_u16(), "Stream endpoint rejected request");
        sink.emit_at(epoch, DriverEventKind::Failure(err.to_string()))
            .await;
        return;
    }

    if !sink
        .emit_at(epoch, DriverEventKind::Connection(ConnectionState::Connected))
        .await
    {
        return;
    }

    let mut stream = response.bytes_stream();
    let mut decoder = EventLineDecoder::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                decoder.push(&bytes);
                while let Some(message) = decoder.next_message() {
                    let terminal = message.is_terminal();
                    tracing::debug!(kind = message.kind(), "Stream message");
                    if !sink.emit_at(epoch, DriverEventKind::Message(message)).await {
                        // Orchestrator dropped
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Stream read failed");
                let err = TransportError::ConnectionFailed(e.to_string());
                sink.emit_at(epoch, DriverEventKind::Failure(err.to_string()))
                    .await;
                return;
            }
        }
    }

    if let Some(message) = decoder.finish() {
        let terminal = message.is_terminal();
        sink.emit_at(epoch, DriverEventKind::Message(message)).await;
        if terminal {
            return;
        }
    }

    tracing::warn!("Stream ended without a terminal message");
    sink.emit_at(epoch, DriverEventKind::Failure(STREAM_ENDED.to_string()))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn sink() -> (EventSink, mpsc::Receiver<crate::transport::DriverEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (EventSink::new(tx, Arc::new(AtomicU64::new(1))), rx)
    }

    #[tokio::test]
    async fn test_missing_endpoint() {
        let mut transport = SseTransport::new(None, None);
        let (sink, _rx) = sink();

        let result = transport
            .dispatch(&GenerationRequest::new("text"), sink)
            .await;

        assert!(matches!(result, Err(TransportError::MissingEndpoint("stream"))));
        assert!(!transport.is_busy());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_reports_failure() {
        // Port 9 (discard) on loopback is closed in test environments
        let mut transport = SseTransport::new(Some("http://127.0.0.1:9/stream".into()), None);
        let (sink, mut rx) = sink();

        transport
            .dispatch(&GenerationRequest::new("text"), sink)
            .await
            .unwrap();

        let mut saw_failure = false;
        while let Some(event) = rx.recv().await {
            assert_eq!(event.epoch, 1);
            if let DriverEventKind::Failure(reason) = event.kind {
                assert!(reason.starts_with("Connection failed"));
                saw_failure = true;
            }
        }
        assert!(saw_failure);
    }

    #[test]
    fn test_transport_metadata() {
        let transport = SseTransport::from_config(&TransportConfig::stream("http://x/stream"));
        assert_eq!(transport.name(), "stream");
        assert_eq!(transport.endpoint(), Some("http://x/stream"));
        assert!(!transport.is_busy());
    }
}
