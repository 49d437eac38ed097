//! Ereader Core - Streaming Generation Client
//!
//! This crate holds everything an ereader surface needs to ask a remote
//! generator to continue a story from the reader's click position, without
//! depending on any UI framework.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Surfaces                               │
//! │        (CLI, desktop reader, web view, automated tests)         │
//! └───────────────┬──────────────────────────────▲──────────────────┘
//!                 │ start / cancel / reset       │ GenerationUpdate
//! ┌───────────────▼──────────────────────────────┴──────────────────┐
//! │                       GenerationClient                          │
//! │  ┌───────────────────────┐      ┌────────────────────────────┐  │
//! │  │  GenerationTransport  │─────►│   GenerationStateMachine   │  │
//! │  │  (stream │ socket)    │ Driver│  connection · content ·    │  │
//! │  │                       │ Event │  progress · outcome        │  │
//! │  └───────────┬───────────┘      └────────────────────────────┘  │
//! └──────────────┼──────────────────────────────────────────────────┘
//!                │ data: <json>\n  │  JSON text frames
//!                ▼
//!         generation backend
//! ```
//!
//! # Key Types
//!
//! - [`GenerationClient`]: the request orchestrator surfaces call
//! - [`GenerationRequest`] / [`ProtocolMessage`]: the wire protocol
//! - [`GenerationStateMachine`]: accumulates content and progress
//! - [`transport::GenerationTransport`]: the two connection drivers
//! - [`Document`]: a loaded text file with accepted generated blocks
//! - [`TagClient`] / [`TagCatalog`]: the tag catalog offered for requests
//!
//! # Quick Start
//!
//! ```ignore
//! use ereader_core::{Document, GenerationClient, GenerationUpdate, ReaderConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ereader_core::load_config()?;
//!     let document = Document::load("story.txt", config.generation.max_file_size).await?;
//!     let context = document.click_context(1200, config.generation.context_chars);
//!
//!     let mut client = GenerationClient::from_config(&config.transport);
//!     let mut updates = client.subscribe();
//!     let request = config.generation.request(context.context_text, ["romance"]);
//!
//!     if client.start(&request).await {
//!         while let Some(update) = updates.recv().await {
//!             match update {
//!                 GenerationUpdate::Message(msg) => println!("{}", msg.kind()),
//!                 GenerationUpdate::Finished(_) => break,
//!                 _ => {}
//!             }
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod document;
pub mod protocol;
pub mod state;
pub mod tags;
pub mod transport;

// Re-exports for convenience
pub use client::GenerationClient;
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env, ConfigError,
    ConfigOverrides, ConfigSource, GenerationSettings, ReaderConfig,
};
pub use document::{
    ClickContext, Document, DocumentError, GeneratedBlock, TextEncoding, TextPosition,
    MAX_FILE_SIZE,
};
pub use protocol::{
    decode_event_line, decode_event_payload, decode_message, encode_request, CompletePayload,
    DecodeError, GenerationRequest, GenerationStyle, ProgressStep, ProtocolMessage,
};
pub use state::{
    AttemptOutcome, ConnectionState, GenerationSnapshot, GenerationStateMachine, GenerationUpdate,
};
pub use tags::{Tag, TagCatalog, TagClient, TagSelection, WorkerState, WorkerStatus};
pub use transport::{TransportConfig, TransportError, TransportType};
