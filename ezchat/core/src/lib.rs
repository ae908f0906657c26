//! ezchat Core - Streaming Chat-Completion Ingestion
//!
//! This crate turns a conversation into a live, incrementally-built reply from
//! a remote language-model service. It opens a streaming chat-completion
//! request, reassembles frames across network reads, extracts text tokens and
//! folds them into the conversation one at a time.
//!
//! # Architecture
//!
//! ```text
//!   caller (CLI, UI)
//!        │ send(text, cancel)                 ▲ TurnUpdate (mpsc)
//!        ▼                                    │
//!  ┌──────────────────────────────────────────┴──────────┐
//!  │ ChatSession ── ModelSelector                        │
//!  │     │                                               │
//!  │ ChatClient ──► StreamPump ──► TurnAccumulator       │
//!  │                  │   ▲                              │
//!  │        bytes     │   │ Token                        │
//!  │                  ▼   │                              │
//!  │   Utf8Decoder ► FrameDecoder ► WireFormat::adapt    │
//!  └──────────────────┬──────────────────────────────────┘
//!                     │ Transport (HttpTransport / scripted)
//!                     ▼
//!             inference service
//! ```
//!
//! # Key Types
//!
//! - [`ChatSession`]: single-flight turn driver over an explicit conversation
//! - [`ChatClient`]: builds requests and opens pumps
//! - [`StreamPump`]: lazy, cancellable token sequence for one response
//! - [`FrameDecoder`]: delimiter framing with partial-frame carry-over
//! - [`WireFormat`]: SSE text, SSE JSON, NDJSON or raw passthrough
//! - [`TurnAccumulator`]: reducer from tokens to finalized messages
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use ezchat_core::{config, ChatClient, ChatSession, FixedModel};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = config::load_config()?;
//! let client = ChatClient::from_config(&config)?;
//! let (mut session, mut updates) =
//!     ChatSession::new(client, Arc::new(FixedModel::new("llama3.2")))
//!         .with_update_channel(config.update_buffer);
//!
//! let outcome = session.send("Hello!", CancellationToken::new()).await?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod accumulator;
pub mod client;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod format;
pub mod framing;
pub mod messages;
pub mod pump;
pub mod session;
pub mod transport;

pub use accumulator::{TurnAccumulator, TurnEnd, TurnUpdate};
pub use client::ChatClient;
pub use collaborators::{ContextFile, ContextUploader, FixedModel, HttpModelCatalog, ModelSelector};
pub use config::{ClientConfig, ConfigError, ConfigOverrides, ConfigSource};
pub use error::{ChatError, StreamError};
pub use format::{Adapted, MalformedFrame, WireFormat};
pub use framing::{decode, Decoded, Delimiter, FrameDecoder, FrameTooLarge, Pushed, Utf8Decoder};
pub use messages::{Conversation, Message, MessageId, Role, Token};
pub use pump::{PumpState, PumpStats, StreamOptions, StreamPump, TokenStream};
pub use session::{ChatSession, Termination, TurnOutcome};
pub use transport::{
    BodyStream, HttpRequest, HttpTransport, Method, Transport, TransportError, TransportResponse,
};
