//! Generation Message Protocol
//!
//! Wire types exchanged with the content-generation backend. Both transports
//! carry the same JSON bodies:
//!
//! ```text
//! Outbound: { "content": "...", "tags"?: [...], "maxLength"?: n, "style"?: "continue" }
//! Inbound:  { "type": "status" | "progress" | "stream" | "complete" | "error", ... }
//! ```
//!
//! The stream transport additionally wraps every inbound object in an event
//! line `data: <json>\n`.
//!
//! Decoding is forgiving: an unknown `type` is skipped rather than treated as
//! a failure, and a line that does not parse is dropped with a warning so the
//! rest of the stream keeps flowing.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default maximum generated length assumed by the backend
pub const DEFAULT_MAX_LENGTH: u32 = 800;

/// Prefix that marks a payload-carrying event line
pub const EVENT_DATA_PREFIX: &str = "data: ";

// ============================================================================
// Outbound
// ============================================================================

/// How the backend should relate generated text to the context
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationStyle {
    /// Continue the story from the click position
    #[default]
    Continue,
    /// Expand on the context
    Expand,
    /// Rewrite the context as a variation
    Variation,
}

impl fmt::Display for GenerationStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Expand => write!(f, "expand"),
            Self::Variation => write!(f, "variation"),
        }
    }
}

impl std::str::FromStr for GenerationStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "expand" => Ok(Self::Expand),
            "variation" => Ok(Self::Variation),
            other => Err(format!("unknown generation style: {other}")),
        }
    }
}

/// A single generation request
///
/// Optional fields are omitted from the encoded JSON when unset, so the
/// backend can tell "absent" apart from an explicit default.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    /// Context text preceding the click position
    pub content: String,
    /// Tag names selected by the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    /// Maximum generated length in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    /// Generation style
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<GenerationStyle>,
    /// Upper bound on characters extracted from the context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character_limit: Option<u32>,
}

impl GenerationRequest {
    /// Create a request carrying only the context text
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tags: None,
            max_length: None,
            style: None,
            character_limit: None,
        }
    }

    /// Set the selected tags
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    /// Set the maximum generated length
    #[must_use]
    pub fn with_max_length(mut self, max_length: u32) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Set the generation style
    #[must_use]
    pub fn with_style(mut self, style: GenerationStyle) -> Self {
        self.style = Some(style);
        self
    }

    /// Set the character limit
    #[must_use]
    pub fn with_character_limit(mut self, limit: u32) -> Self {
        self.character_limit = Some(limit);
        self
    }

    /// Maximum length the backend will apply when none is sent
    #[must_use]
    pub fn effective_max_length(&self) -> u32 {
        self.max_length.unwrap_or(DEFAULT_MAX_LENGTH)
    }
}

/// Encode a request as a JSON body / text frame
pub fn encode_request(request: &GenerationRequest) -> Result<String, serde_json::Error> {
    serde_json::to_string(request)
}

// ============================================================================
// Inbound
// ============================================================================

/// Pipeline stage reported by a progress message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStep {
    /// Character extraction
    Characters,
    /// Context summarization
    Summary,
    /// Tag detection
    Tags,
    /// Related snippet lookup
    Snippets,
    /// Text generation
    Generation,
}

impl fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Characters => write!(f, "characters"),
            Self::Summary => write!(f, "summary"),
            Self::Tags => write!(f, "tags"),
            Self::Snippets => write!(f, "snippets"),
            Self::Generation => write!(f, "generation"),
        }
    }
}

/// Terminal success payload
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletePayload {
    /// Whether generation succeeded
    pub success: bool,
    /// Authoritative generated text
    #[serde(default)]
    pub generated_content: String,
    /// Characters extracted from the context
    #[serde(default)]
    pub extracted_characters: Vec<serde_json::Value>,
    /// Summary of the context
    #[serde(default)]
    pub content_summary: String,
    /// Tags detected in the context
    #[serde(default)]
    pub detected_tags: Vec<String>,
    /// Snippets the backend drew on
    #[serde(default)]
    pub related_snippets: Vec<serde_json::Value>,
}

/// Messages sent by the generation backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProtocolMessage {
    /// Informational progress note
    Status {
        /// Human-readable status text
        message: String,
    },
    /// Structured progress for one pipeline step
    Progress {
        /// Which step finished
        step: ProgressStep,
        /// Step-specific payload
        #[serde(default)]
        data: serde_json::Value,
        /// Optional human-readable text
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Incremental fragment of generated text
    Stream {
        /// Text to append
        chunk: String,
    },
    /// Generation finished
    Complete {
        /// Final payload
        data: CompletePayload,
    },
    /// Generation failed
    Error {
        /// Failure description
        message: String,
        /// Machine-readable code
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Whether retrying may succeed
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retryable: Option<bool>,
    },
}

impl ProtocolMessage {
    /// Wire discriminants this client understands
    pub const KNOWN_TYPES: [&'static str; 5] = ["status", "progress", "stream", "complete", "error"];

    /// Whether this message ends a generation attempt
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Error { .. })
    }

    /// Wire discriminant of this message
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Status { .. } => "status",
            Self::Progress { .. } => "progress",
            Self::Stream { .. } => "stream",
            Self::Complete { .. } => "complete",
            Self::Error { .. } => "error",
        }
    }

    /// Line shown in the progress log, if this message contributes one
    #[must_use]
    pub fn progress_line(&self) -> Option<String> {
        match self {
            Self::Status { message } => Some(message.clone()),
            Self::Progress { step, message, .. } => Some(
                message
                    .clone()
                    .unwrap_or_else(|| format!("{step} completed")),
            ),
            _ => None,
        }
    }
}

/// Errors from decoding a single inbound payload
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON, or a known variant has the wrong shape
    #[error("invalid message JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload has no string `type` discriminant
    #[error("message has no `type` field")]
    MissingType,
}

/// Decode one JSON payload
///
/// Returns `Ok(None)` for messages with a `type` this client does not know.
pub fn decode_message(json: &str) -> Result<Option<ProtocolMessage>, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(json)?;

    let kind = value
        .get("type")
        .and_then(serde_json::Value::as_str)
        .ok_or(DecodeError::MissingType)?;

    if !ProtocolMessage::KNOWN_TYPES.contains(&kind) {
        tracing::debug!(kind = kind, "Ignoring message with unknown type");
        return Ok(None);
    }

    Ok(Some(serde_json::from_value(value)?))
}

/// Extract the JSON body of an event line
///
/// Only lines starting with `data: ` carry a payload; blank payloads are
/// treated as absent.
#[must_use]
pub fn event_line_payload(line: &str) -> Option<&str> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line.strip_prefix(EVENT_DATA_PREFIX)?;
    if payload.trim().is_empty() {
        None
    } else {
        Some(payload)
    }
}

/// Decode one event line
///
/// Non-data lines, blank payloads, unknown types and undecodable payloads all
/// yield `None`; undecodable payloads are logged.
#[must_use]
pub fn decode_event_line(line: &str) -> Option<ProtocolMessage> {
    let payload = event_line_payload(line)?;
    match decode_message(payload) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, line = line, "Dropping undecodable event line");
            None
        }
    }
}

/// Decode every complete event line in a text payload
///
/// A malformed line never prevents decoding of the lines after it.
#[must_use]
pub fn decode_event_payload(payload: &str) -> Vec<ProtocolMessage> {
    payload.split('\n').filter_map(decode_event_line).collect()
}
