//! Format Adapter
//!
//! Turns one decoded record into a token or a control signal. The wire format
//! is picked from configuration when the stream is opened; the two framings
//! cannot be told apart reliably by looking at the bytes.
//!
//! # Supported Formats
//!
//! - [`WireFormat::SseText`]: `data: <text>\n\n`, the payload is the token
//! - [`WireFormat::SseJson`]: `data: <json>\n\n`, the token sits in a nested
//!   content field (`choices[0].delta.content`, `message.content` or `content`)
//! - [`WireFormat::Ndjson`]: one JSON object per line, token in
//!   `message.content`, completion flagged by `"done": true`
//! - [`WireFormat::Raw`]: no framing, every chunk of text is a token
//!
//! A record that cannot be parsed is reported as [`Adapted::Malformed`] and
//! never ends the stream.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::framing::Delimiter;
use crate::messages::Token;

/// Prefix every SSE data record starts with
pub const SSE_DATA_PREFIX: &str = "data: ";

/// SSE payload marking the end of the stream
pub const SSE_DONE_SENTINEL: &str = "[DONE]";

/// Longest record excerpt kept in a [`MalformedFrame`]
const EXCERPT_CHARS: usize = 80;

/// Wire format of a streaming response
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireFormat {
    /// SSE-style blocks whose payload is plain text
    SseText,
    /// SSE-style blocks whose payload is a JSON chunk
    SseJson,
    /// Newline-delimited JSON objects, as relayed from Ollama `/api/chat`
    #[default]
    Ndjson,
    /// Unframed text
    Raw,
}

impl WireFormat {
    /// Record delimiter for this format
    #[must_use]
    pub fn delimiter(self) -> Delimiter {
        match self {
            Self::SseText | Self::SseJson => Delimiter::BLANK_LINE,
            Self::Ndjson => Delimiter::NEWLINE,
            Self::Raw => Delimiter::Passthrough,
        }
    }

    /// Configuration name of the format
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SseText => "sse-text",
            Self::SseJson => "sse-json",
            Self::Ndjson => "ndjson",
            Self::Raw => "raw",
        }
    }

    /// Normalize one record
    #[must_use]
    pub fn adapt(self, record: &str) -> Adapted {
        match self {
            Self::SseText => adapt_sse(record, Adapted::token),
            Self::SseJson => adapt_sse(record, |payload| adapt_json(payload, record, JsonShape::Chunk)),
            Self::Ndjson => adapt_ndjson(record),
            Self::Raw => Adapted::token(record),
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown wire format name
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Unknown wire format '{0}' (expected sse-text, sse-json, ndjson or raw)")]
pub struct UnknownWireFormat(pub String);

impl FromStr for WireFormat {
    type Err = UnknownWireFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sse" | "sse-text" | "sse_text" => Ok(Self::SseText),
            "sse-json" | "sse_json" => Ok(Self::SseJson),
            "ndjson" | "jsonl" => Ok(Self::Ndjson),
            "raw" | "text" => Ok(Self::Raw),
            _ => Err(UnknownWireFormat(s.to_string())),
        }
    }
}

/// Result of adapting one record
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Adapted {
    /// Incremental reply text
    Token(Token),
    /// Explicit end of stream, with any text carried by the same record
    Done(Option<Token>),
    /// Nothing to deliver (metadata, comments, empty payloads)
    Skip,
    /// The record could not be parsed; the stream continues
    Malformed(MalformedFrame),
    /// The backend reported a failure inside the stream
    Failed(String),
}

impl Adapted {
    fn token(text: &str) -> Self {
        if text.is_empty() {
            Self::Skip
        } else {
            Self::Token(Token::from(text))
        }
    }
}

/// A record that failed to parse under the active format
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Malformed frame ({reason}): {excerpt:?}")]
pub struct MalformedFrame {
    /// Parser message
    pub reason: String,
    /// Start of the offending record
    pub excerpt: String,
}

impl MalformedFrame {
    fn new(reason: impl fmt::Display, record: &str) -> Self {
        Self {
            reason: reason.to_string(),
            excerpt: record.chars().take(EXCERPT_CHARS).collect(),
        }
    }
}

fn adapt_sse(record: &str, payload: impl FnOnce(&str) -> Adapted) -> Adapted {
    let record = record.trim_start_matches(['\r', '\n']);
    let Some(rest) = record.strip_prefix(SSE_DATA_PREFIX) else {
        tracing::trace!(record = %record, "Skipping non-data SSE record");
        return Adapted::Skip;
    };

    let data = rest.trim();
    if data.is_empty() {
        return Adapted::Skip;
    }
    if data == SSE_DONE_SENTINEL {
        return Adapted::Done(None);
    }
    payload(data)
}

fn adapt_ndjson(record: &str) -> Adapted {
    let line = record.trim();
    if line.is_empty() {
        return Adapted::Skip;
    }
    adapt_json(line, record, JsonShape::Message)
}

/// Where a JSON payload keeps its text
#[derive(Clone, Copy)]
enum JsonShape {
    /// SSE chunk: OpenAI delta, relayed Ollama message, or bare content
    Chunk,
    /// Ollama chat line: `message.content`
    Message,
}

fn adapt_json(payload: &str, record: &str, shape: JsonShape) -> Adapted {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => return Adapted::Malformed(MalformedFrame::new(e, record)),
    };

    if !value.is_object() {
        return Adapted::Malformed(MalformedFrame::new("expected a JSON object", record));
    }

    if let Some(error) = backend_error(&value) {
        return Adapted::Failed(error);
    }

    let text = match shape {
        JsonShape::Chunk => chunk_content(&value),
        JsonShape::Message => value["message"]["content"].as_str(),
    }
    .unwrap_or_default();

    if value["done"].as_bool().unwrap_or(false) {
        let last = (!text.is_empty()).then(|| Token::from(text));
        return Adapted::Done(last);
    }

    Adapted::token(text)
}

fn chunk_content(value: &Value) -> Option<&str> {
    value["choices"][0]["delta"]["content"]
        .as_str()
        .or_else(|| value["message"]["content"].as_str())
        .or_else(|| value["content"].as_str())
}

fn backend_error(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        other => Some(
            other["message"]
                .as_str()
                .map_or_else(|| other.to_string(), str::to_string),
        ),
    }
}
