//! Generation State Machine
//!
//! Consumes decoded protocol messages and connectivity signals for one
//! orchestrator and maintains everything a surface renders:
//!
//! - the connection state
//! - the accumulated generated text (stream chunks are a preview; the text
//!   shipped in `complete` replaces them)
//! - the progress log
//! - the outcome of the current attempt
//!
//! Every applied change is pushed to subscribers as a [`GenerationUpdate`],
//! in the same order the changes were applied.
//!
//! # Epochs
//!
//! Driver events carry the epoch they were produced under. The orchestrator
//! moves to a new epoch on every `start` and `cancel`, so events still queued
//! from an abandoned attempt are discarded instead of corrupting the new one.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::protocol::{CompletePayload, ProtocolMessage};
use crate::transport::{DriverEvent, DriverEventKind};

/// Monotonic attempt/session counter used to discard stale driver events
pub type Epoch = u64;

/// Connectivity of the active generation session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No transport resource is held
    #[default]
    Disconnected,
    /// Opening the transport
    Connecting,
    /// Transport is open
    Connected,
    /// Waiting to retry after an abnormal closure
    Reconnecting,
    /// Last attempt failed
    Error,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// How an attempt ended
#[derive(Clone, Debug, PartialEq)]
pub enum AttemptOutcome {
    /// A `complete` message arrived
    Completed(CompletePayload),
    /// An `error` message arrived or the transport failed
    Failed {
        /// Failure description
        message: String,
        /// Machine-readable code, if the backend sent one
        code: Option<String>,
        /// Whether the backend marked the failure retryable
        retryable: Option<bool>,
    },
    /// The caller cancelled the attempt
    Cancelled,
}

impl AttemptOutcome {
    /// Whether the attempt produced usable content
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(payload) if payload.success)
    }
}

/// Change notification delivered to subscribers
#[derive(Clone, Debug, PartialEq)]
pub enum GenerationUpdate {
    /// Connection state changed
    Connection(ConnectionState),
    /// A protocol message was applied
    Message(ProtocolMessage),
    /// A user-visible error occurred
    Error(String),
    /// The current attempt ended
    Finished(AttemptOutcome),
}

/// Point-in-time copy of the machine's observable state
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationSnapshot {
    /// Connection state
    pub connection: ConnectionState,
    /// Accumulated generated text
    pub content: String,
    /// Progress log lines in arrival order
    pub progress: Vec<String>,
    /// Last applied protocol message
    pub last_message: Option<ProtocolMessage>,
    /// Outcome of the latest attempt, once it ended
    pub outcome: Option<AttemptOutcome>,
    /// Whether an attempt is in flight
    pub active: bool,
}

/// State machine for one orchestrator
///
/// Owned behind the orchestrator's lock; never shared between two
/// concurrent attempts.
#[derive(Debug, Default)]
pub struct GenerationStateMachine {
    connection: ConnectionState,
    content: String,
    progress: Vec<String>,
    last_message: Option<ProtocolMessage>,
    outcome: Option<AttemptOutcome>,
    epoch: Epoch,
    active: bool,
    subscribers: Vec<mpsc::UnboundedSender<GenerationUpdate>>,
}

impl GenerationStateMachine {
    /// Create a machine in the `disconnected` state
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber
    ///
    /// Every update is queued for every live subscriber, however far behind
    /// it is. Dropping the receiver unsubscribes.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<GenerationUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    /// Current connection state
    #[must_use]
    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    /// Accumulated generated text
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Progress log
    #[must_use]
    pub fn progress(&self) -> &[String] {
        &self.progress
    }

    /// Last applied protocol message
    #[must_use]
    pub fn last_message(&self) -> Option<&ProtocolMessage> {
        self.last_message.as_ref()
    }

    /// Outcome of the latest attempt
    #[must_use]
    pub fn outcome(&self) -> Option<&AttemptOutcome> {
        self.outcome.as_ref()
    }

    /// Epoch whose driver events are currently accepted
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Whether an attempt has begun and not yet ended
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Copy out the observable state
    #[must_use]
    pub fn snapshot(&self) -> GenerationSnapshot {
        GenerationSnapshot {
            connection: self.connection,
            content: self.content.clone(),
            progress: self.progress.clone(),
            last_message: self.last_message.clone(),
            outcome: self.outcome.clone(),
            active: self.active,
        }
    }

    /// Begin a new attempt under `epoch`
    ///
    /// Clears the accumulator and progress log before any message of the new
    /// attempt can be applied, then moves to `connecting`.
    pub fn begin_attempt(&mut self, epoch: Epoch) {
        self.epoch = epoch;
        self.content.clear();
        self.progress.clear();
        self.last_message = None;
        self.outcome = None;
        self.active = true;
        self.set_connection(ConnectionState::Connecting);
    }

    /// Apply one driver event
    ///
    /// Events from any epoch other than the current one are discarded.
    pub fn handle(&mut self, event: DriverEvent) {
        if event.epoch != self.epoch {
            tracing::debug!(
                event_epoch = event.epoch,
                current_epoch = self.epoch,
                "Discarding stale driver event"
            );
            return;
        }

        match event.kind {
            DriverEventKind::Connection(state) => self.set_connection(state),
            DriverEventKind::Message(message) => self.apply(message),
            DriverEventKind::Failure(reason) => self.fail(reason),
        }
    }

    /// Apply one protocol message to the current attempt
    ///
    /// Messages arriving when no attempt is in flight (including after a
    /// terminal message) are ignored.
    pub fn apply(&mut self, message: ProtocolMessage) {
        if !self.active {
            tracing::debug!(kind = message.kind(), "Ignoring message outside an active attempt");
            return;
        }

        if let Some(line) = message.progress_line() {
            self.progress.push(line);
        }

        let mut finished = None;
        match &message {
            ProtocolMessage::Status { .. } | ProtocolMessage::Progress { .. } => {}
            ProtocolMessage::Stream { chunk } => {
                self.content.push_str(chunk);
            }
            ProtocolMessage::Complete { data } => {
                if data.success {
                    self.content.clone_from(&data.generated_content);
                }
                self.active = false;
                self.set_connection(ConnectionState::Connected);
                finished = Some(AttemptOutcome::Completed(data.clone()));
            }
            ProtocolMessage::Error {
                message: text,
                code,
                retryable,
            } => {
                self.active = false;
                self.notify(GenerationUpdate::Error(text.clone()));
                self.set_connection(ConnectionState::Error);
                finished = Some(AttemptOutcome::Failed {
                    message: text.clone(),
                    code: code.clone(),
                    retryable: *retryable,
                });
            }
        }

        self.last_message = Some(message.clone());
        self.notify(GenerationUpdate::Message(message));

        if let Some(outcome) = finished {
            self.finish(outcome);
        }
    }

    /// Record a transport-level failure
    ///
    /// Always surfaces the error and moves to `error`; ends the attempt if
    /// one is in flight.
    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::warn!(reason = %reason, "Generation transport failed");

        self.notify(GenerationUpdate::Error(reason.clone()));
        self.set_connection(ConnectionState::Error);

        if self.active {
            self.active = false;
            self.finish(AttemptOutcome::Failed {
                message: reason,
                code: None,
                retryable: None,
            });
        }
    }

    /// Cancel the in-flight attempt and move to `new_epoch`
    ///
    /// Accumulated content is left in place for inspection.
    pub fn cancel(&mut self, new_epoch: Epoch) {
        self.epoch = new_epoch;
        if self.active {
            self.active = false;
            self.finish(AttemptOutcome::Cancelled);
        }
        self.set_connection(ConnectionState::Disconnected);
    }

    /// Clear the accumulator and progress log, keeping the connection state
    pub fn reset(&mut self) {
        self.content.clear();
        self.progress.clear();
    }

    /// Surface an error that does not belong to any attempt
    pub fn notify_error(&mut self, message: impl Into<String>) {
        self.notify(GenerationUpdate::Error(message.into()));
    }

    /// Move to `state`, notifying subscribers on change
    pub fn set_connection(&mut self, state: ConnectionState) {
        if self.connection == state {
            return;
        }
        tracing::debug!(from = %self.connection, to = %state, "Connection state changed");
        self.connection = state;
        self.notify(GenerationUpdate::Connection(state));
    }

    fn finish(&mut self, outcome: AttemptOutcome) {
        self.outcome = Some(outcome.clone());
        self.notify(GenerationUpdate::Finished(outcome));
    }

    fn notify(&mut self, update: GenerationUpdate) {
        self.subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }
}
