//! Persistent WebSocket Transport
//!
//! One socket is opened and reused for every request. A background worker
//! task owns the socket; the transport talks to it over a command channel.
//!
//! # Reconnection
//!
//! An abnormal closure (any close code other than 1000, a dropped TCP
//! connection, or a failed handshake) schedules a reconnect after
//! `interval × n`, where `n` is the retry number. The counter resets once a
//! socket opens. When `reconnect_attempts` retries have failed the worker
//! settles in `disconnected` and exits; the next request starts a fresh
//! worker.
//!
//! A connect that does not reach "open" within the connect timeout is
//! reported as an error and is not retried.
//!
//! # Deferred sends
//!
//! A request dispatched while the socket is still connecting (or waiting
//! to reconnect) is parked in the worker and sent as soon as the socket
//! opens.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use super::config::TransportConfig;
use super::traits::{DriverEventKind, EventSink, GenerationTransport, TransportError};
use crate::protocol::{decode_message, encode_request, GenerationRequest};
use crate::state::{ConnectionState, Epoch};

/// Rewrite an `http(s)://` endpoint to `ws(s)://`
///
/// Other schemes are returned unchanged.
#[must_use]
pub fn socket_url(endpoint: &str) -> String {
    if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        endpoint.to_string()
    }
}

/// Time allowed for the worker to deliver a close frame on cancel
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Instructions from the transport to its worker
#[derive(Debug)]
enum SocketCommand {
    /// Send an encoded request on behalf of attempt `epoch`
    Send { epoch: Epoch, frame: String },
    /// Close the socket normally and stop
    Close,
}

/// Persistent WebSocket transport
pub struct SocketTransport {
    endpoint: Option<String>,
    connect_timeout: Duration,
    reconnect_attempts: u32,
    reconnect_interval: Duration,
    commands: Option<mpsc::UnboundedSender<SocketCommand>>,
    task: Option<JoinHandle<()>>,
}

impl SocketTransport {
    /// Create a transport from `TransportConfig`
    #[must_use]
    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            connect_timeout: config.connect_timeout(),
            reconnect_attempts: config.reconnect_attempts,
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
            commands: None,
            task: None,
        }
    }

    /// Whether a worker currently owns (or is opening) a socket
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Start a worker unless one is already running
    fn ensure_worker(&mut self, sink: EventSink) -> Result<(), TransportError> {
        let url = socket_url(self.require_endpoint()?);
        if self.is_running() {
            return Ok(());
        }

        tracing::info!(url = %url, "Starting socket worker");

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = SocketWorker {
            epoch: sink.current_epoch(),
            url,
            connect_timeout: self.connect_timeout,
            reconnect_attempts: self.reconnect_attempts,
            reconnect_interval: self.reconnect_interval,
            commands: rx,
            sink,
            pending: None,
            in_flight: false,
            retries: 0,
            state: ConnectionState::Disconnected,
        };

        self.commands = Some(tx);
        self.task = Some(tokio::spawn(worker.run()));
        Ok(())
    }
}

#[async_trait]
impl GenerationTransport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    async fn connect(&mut self, sink: EventSink) -> Result<(), TransportError> {
        self.ensure_worker(sink)
    }

    async fn dispatch(
        &mut self,
        request: &GenerationRequest,
        sink: EventSink,
    ) -> Result<(), TransportError> {
        let frame = encode_request(request)?;
        let epoch = sink.current_epoch();
        self.ensure_worker(sink)?;

        let commands = self.commands.as_ref().ok_or(TransportError::ConnectionClosed)?;
        commands
            .send(SocketCommand::Send { epoch, frame })
            .map_err(|_| TransportError::SendFailed("socket worker stopped".into()))
    }

    async fn cancel(&mut self) {
        if let Some(commands) = self.commands.take() {
            // Worker may already have exited
            let _ = commands.send(SocketCommand::Close);
        }
        if let Some(mut task) = self.task.take() {
            if !task.is_finished() {
                tracing::info!("Closing socket");
                if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                    tracing::debug!("Socket worker did not stop in time");
                    task.abort();
                }
            }
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// How a live socket stopped being usable
enum SocketEnd {
    /// Close frame with code 1000
    Normal,
    /// Anything else
    Abnormal(String),
    /// The transport asked us to stop
    Shutdown,
}

/// Owns the socket and all reconnect state
struct SocketWorker {
    /// Epoch of the latest request handed to us
    epoch: Epoch,
    url: String,
    connect_timeout: Duration,
    reconnect_attempts: u32,
    reconnect_interval: Duration,
    commands: mpsc::UnboundedReceiver<SocketCommand>,
    sink: EventSink,
    /// Request waiting for the socket to open
    pending: Option<String>,
    /// A request was sent and its terminal message has not arrived
    in_flight: bool,
    retries: u32,
    state: ConnectionState,
}

impl SocketWorker {
    async fn run(mut self) {
        loop {
            self.set_state(ConnectionState::Connecting).await;

            let end = match self.open().await {
                Opened::Socket(socket) => self.serve(*socket).await,
                Opened::Failed(reason) => SocketEnd::Abnormal(reason),
                Opened::TimedOut => {
                    tracing::warn!(
                        timeout_ms = self.connect_timeout.as_millis() as u64,
                        url = %self.url,
                        "Socket connect timed out"
                    );
                    self.pending = None;
                    self.in_flight = false;
                    let err = TransportError::Timeout(self.connect_timeout);
                    self.emit(DriverEventKind::Failure(err.to_string())).await;
                    return;
                }
                Opened::Shutdown => return,
            };

            match end {
                SocketEnd::Shutdown => return,
                SocketEnd::Normal => {
                    tracing::info!("Socket closed normally");
                    if self.in_flight || self.pending.is_some() {
                        self.in_flight = false;
                        self.pending = None;
                        let err = TransportError::ConnectionClosed;
                        self.emit(DriverEventKind::Failure(err.to_string())).await;
                    }
                    self.set_state(ConnectionState::Disconnected).await;
                    return;
                }
                SocketEnd::Abnormal(reason) => {
                    tracing::warn!(reason = %reason, "Socket closed abnormally");
                    if self.in_flight {
                        self.in_flight = false;
                        self.emit(DriverEventKind::Failure("Connection lost".into()))
                            .await;
                    }
                    if !self.wait_for_retry().await {
                        return;
                    }
                }
            }
        }
    }

    /// Connect within the timeout, parking any request that arrives meanwhile
    async fn open(&mut self) -> Opened {
        let connect = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(self.url.clone()),
        );
        tokio::pin!(connect);

        loop {
            tokio::select! {
                result = &mut connect => {
                    return match result {
                        Ok(Ok((socket, _response))) => Opened::Socket(Box::new(socket)),
                        Ok(Err(e)) => Opened::Failed(e.to_string()),
                        Err(_) => Opened::TimedOut,
                    };
                }
                command = self.commands.recv() => match command {
                    Some(SocketCommand::Send { epoch, frame }) => self.park(epoch, frame).await,
                    Some(SocketCommand::Close) | None => return Opened::Shutdown,
                },
            }
        }
    }

    /// Pump an open socket until it closes or we are told to stop
    async fn serve(&mut self, socket: WsStream) -> SocketEnd {
        self.retries = 0;
        self.set_state(ConnectionState::Connected).await;
        tracing::info!(url = %self.url, "Socket connected");

        let (mut write, mut read) = socket.split();

        if let Some(frame) = self.pending.take() {
            if let Err(e) = write.send(Message::Text(frame.into())).await {
                return self.send_failed(e.to_string()).await;
            }
            self.in_flight = true;
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SocketCommand::Send { epoch, frame }) => {
                        self.epoch = epoch;
                        self.announce().await;
                        if let Err(e) = write.send(Message::Text(frame.into())).await {
                            return self.send_failed(e.to_string()).await;
                        }
                        self.in_flight = true;
                    }
                    Some(SocketCommand::Close) | None => {
                        let close = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client closed".into(),
                        };
                        if let Err(e) = write.send(Message::Close(Some(close))).await {
                            tracing::debug!(error = %e, "Close frame not delivered");
                        }
                        return SocketEnd::Shutdown;
                    }
                },
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.receive(&text).await,
                    Some(Ok(Message::Binary(bytes))) => {
                        self.receive(&String::from_utf8_lossy(&bytes)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return match frame {
                            Some(frame) if frame.code == CloseCode::Normal => SocketEnd::Normal,
                            Some(frame) => SocketEnd::Abnormal(format!(
                                "close code {}",
                                u16::from(frame.code)
                            )),
                            None => SocketEnd::Abnormal("close without status".into()),
                        };
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return SocketEnd::Abnormal(e.to_string()),
                    None => return SocketEnd::Abnormal("connection dropped".into()),
                },
            }
        }
    }

    /// Decode one inbound frame and forward it
    async fn receive(&mut self, text: &str) {
        match decode_message(text) {
            Ok(Some(message)) => {
                if message.is_terminal() {
                    self.in_flight = false;
                }
                tracing::debug!(kind = message.kind(), "Socket message");
                self.emit(DriverEventKind::Message(message)).await;
            }
            Ok(None) => tracing::debug!("Ignoring socket message of unknown type"),
            Err(e) => tracing::warn!(error = %e, "Failed to decode socket message"),
        }
    }

    async fn send_failed(&mut self, reason: String) -> SocketEnd {
        tracing::warn!(error = %reason, "Failed to send request");
        self.in_flight = false;
        let err = TransportError::SendFailed(reason.clone());
        self.emit(DriverEventKind::Failure(err.to_string())).await;
        SocketEnd::Abnormal(reason)
    }

    /// Sleep out the backoff delay; `false` when the worker should stop
    async fn wait_for_retry(&mut self) -> bool {
        if self.retries >= self.reconnect_attempts {
            tracing::error!(
                attempts = self.retries,
                url = %self.url,
                "Reconnection attempts exhausted"
            );
            if self.pending.take().is_some() {
                self.emit(DriverEventKind::Failure(format!(
                    "Connection lost after {} reconnection attempts",
                    self.retries
                )))
                .await;
            }
            self.set_state(ConnectionState::Disconnected).await;
            return false;
        }

        self.retries += 1;
        let delay = self.reconnect_interval.saturating_mul(self.retries);
        tracing::info!(
            attempt = self.retries,
            max_attempts = self.reconnect_attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );
        self.set_state(ConnectionState::Reconnecting).await;

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(SocketCommand::Send { epoch, frame }) => self.park(epoch, frame).await,
                    Some(SocketCommand::Close) | None => return false,
                },
            }
        }
    }

    /// Hold a request until the socket opens
    async fn park(&mut self, epoch: Epoch, frame: String) {
        tracing::debug!(epoch, "Deferring request until socket opens");
        self.epoch = epoch;
        self.pending = Some(frame);
        self.announce().await;
    }

    /// Re-send the current state under the current epoch
    async fn announce(&mut self) {
        let state = self.state;
        self.emit(DriverEventKind::Connection(state)).await;
    }

    async fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.emit(DriverEventKind::Connection(state)).await;
    }

    async fn emit(&self, kind: DriverEventKind) {
        if !self.sink.emit_at(self.epoch, kind).await {
            tracing::debug!("Event sink closed");
        }
    }
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

enum Opened {
    Socket(Box<WsStream>),
    Failed(String),
    TimedOut,
    Shutdown,
}
