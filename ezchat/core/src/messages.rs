//! Conversation Data Model
//!
//! Messages, the append-only conversation they live in, and the token type
//! that flows from the stream pump to the turn accumulator.
//!
//! # Design Philosophy
//!
//! A [`Conversation`] only ever holds finalized messages. The single
//! in-flight assistant reply lives inside the
//! [`TurnAccumulator`](crate::accumulator::TurnAccumulator) until it is
//! finalized, so everything reachable from a `Conversation` is immutable
//! history. Insertion order is chat order and is replayed verbatim as the
//! context of the next request.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("msg_{}", Uuid::new_v4().simple()))
    }

    /// Borrow the raw identifier
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User input
    User,
    /// Model reply
    Assistant,
    /// System instruction
    System,
}

impl Role {
    /// Wire name of the role
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message in the conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Who sent this message
    pub role: Role,
    /// Message content
    pub content: String,
    /// When the message was created (Unix timestamp ms)
    pub timestamp: u64,
}

impl Message {
    /// Create a new message
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content: content.into(),
            timestamp: now_ms(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// An ordered, append-only sequence of finalized messages
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Create an empty conversation
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finalized message
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// All messages in chat order
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The most recent message
    #[must_use]
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Number of messages
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation has no messages
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Drop all history
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl From<Vec<Message>> for Conversation {
    fn from(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

impl<'a> IntoIterator for &'a Conversation {
    type Item = &'a Message;
    type IntoIter = std::slice::Iter<'a, Message>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.iter()
    }
}

/// One unit of incremental reply text
///
/// Tokens are consumed by the accumulator as soon as they are yielded and
/// carry no identity of their own.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    /// Wrap text as a token
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Borrow the token text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Take the token text
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Whether the token carries no text
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Token {
    fn from(text: &str) -> Self {
        Self(text.to_string())
    }
}

impl From<String> for Token {
    fn from(text: String) -> Self {
        Self(text)
    }
}

/// `{role, content}` as it appears inside a chat request
#[derive(Clone, Debug, Serialize)]
pub struct WireMessage<'a> {
    /// Sender role
    pub role: Role,
    /// Message text
    pub content: &'a str,
}

impl<'a> From<&'a Message> for WireMessage<'a> {
    fn from(message: &'a Message) -> Self {
        Self {
            role: message.role,
            content: &message.content,
        }
    }
}

/// Body of a streaming chat-completion request
///
/// Serializes as `{ "model": ..., "messages": [...], "stream": true }`.
#[derive(Clone, Debug, Serialize)]
pub struct ChatRequestBody<'a> {
    /// Model identifier
    pub model: &'a str,
    /// Full context, oldest first
    pub messages: Vec<WireMessage<'a>>,
    /// Always true for this client
    pub stream: bool,
}

impl<'a> ChatRequestBody<'a> {
    /// Build a streaming request body
    ///
    /// `system` is sent as a leading system message when present.
    pub fn new<'h: 'a>(
        model: &'a str,
        system: Option<&'a str>,
        history: impl IntoIterator<Item = &'h Message>,
    ) -> Self {
        let mut messages: Vec<WireMessage<'a>> = system
            .map(|content| WireMessage {
                role: Role::System,
                content,
            })
            .into_iter()
            .collect();
        messages.extend(history.into_iter().map(|message| WireMessage {
            role: message.role,
            content: &message.content,
        }));

        Self {
            model,
            messages,
            stream: true,
        }
    }
}

/// Get current timestamp in milliseconds
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
