//! Turn Accumulator
//!
//! Consumer-side reducer that folds streamed tokens into the assistant's
//! reply.
//!
//! # Design Philosophy
//!
//! The accumulator owns an explicit [`Conversation`] value and at most one
//! in-flight assistant [`Message`]. Every operation returns the
//! [`TurnUpdate`] it caused instead of mutating shared UI state, so the caller
//! decides how (and whether) to render it.
//!
//! Partial replies are kept. A turn that ends in an error or a cancellation is
//! finalized with whatever text had arrived; only a turn that received nothing
//! at all is discarded.

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::messages::{Conversation, Message, MessageId, Role, Token};

/// Why a turn ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnEnd {
    /// The stream completed
    Completed,
    /// The caller aborted the stream
    Cancelled,
    /// The stream failed
    Failed,
}

/// Change published to the renderer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TurnUpdate {
    /// An assistant turn started
    Started {
        /// ID of the in-flight message
        message_id: MessageId,
    },
    /// A token was appended to the in-flight message
    Token {
        /// ID of the in-flight message
        message_id: MessageId,
        /// The appended text
        delta: String,
        /// Full content so far
        content: String,
    },
    /// The in-flight message joined the conversation
    Finalized {
        /// The finalized message
        message: Message,
        /// Why the turn ended
        end: TurnEnd,
    },
    /// The in-flight message ended empty and was dropped
    Discarded {
        /// ID of the dropped message
        message_id: MessageId,
        /// Why the turn ended
        end: TurnEnd,
    },
}

impl TurnUpdate {
    /// ID of the message this update concerns
    #[must_use]
    pub fn message_id(&self) -> &MessageId {
        match self {
            Self::Started { message_id }
            | Self::Token { message_id, .. }
            | Self::Discarded { message_id, .. } => message_id,
            Self::Finalized { message, .. } => &message.id,
        }
    }

    /// Whether this update closes the turn
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Finalized { .. } | Self::Discarded { .. })
    }
}

/// Folds a token stream into a conversation
#[derive(Clone, Debug, Default)]
pub struct TurnAccumulator {
    conversation: Conversation,
    in_flight: Option<Message>,
}

impl TurnAccumulator {
    /// Start from an existing conversation
    #[must_use]
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            in_flight: None,
        }
    }

    /// Finalized history
    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Take the finalized history, dropping any in-flight turn
    #[must_use]
    pub fn into_conversation(self) -> Conversation {
        self.conversation
    }

    /// The reply being assembled, if any
    #[must_use]
    pub fn in_flight(&self) -> Option<&Message> {
        self.in_flight.as_ref()
    }

    /// Whether an assistant turn is streaming
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Append a user message
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TurnInFlight`] while a reply is streaming.
    pub fn push_user(&mut self, text: impl Into<String>) -> Result<&Message, ChatError> {
        if self.is_in_flight() {
            return Err(ChatError::TurnInFlight);
        }
        self.conversation.push(Message::user(text));
        self.conversation.last().ok_or(ChatError::EmptyMessage)
    }

    /// Open a new assistant turn
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TurnInFlight`] if one is already open.
    pub fn begin(&mut self) -> Result<TurnUpdate, ChatError> {
        if self.is_in_flight() {
            return Err(ChatError::TurnInFlight);
        }
        let message = Message::new(Role::Assistant, String::new());
        let message_id = message.id.clone();
        self.in_flight = Some(message);
        Ok(TurnUpdate::Started { message_id })
    }

    /// Append a token to the in-flight reply, opening one if needed
    pub fn on_token(&mut self, token: &Token) -> TurnUpdate {
        let message = self
            .in_flight
            .get_or_insert_with(|| Message::new(Role::Assistant, String::new()));
        message.content.push_str(token.as_str());

        TurnUpdate::Token {
            message_id: message.id.clone(),
            delta: token.as_str().to_string(),
            content: message.content.clone(),
        }
    }

    /// Finalize the in-flight reply after a completed stream
    pub fn on_complete(&mut self) -> Option<TurnUpdate> {
        let message = self.in_flight.take()?;
        Some(self.commit(message, TurnEnd::Completed))
    }

    /// Finalize the partial reply after a failed stream
    pub fn on_error(&mut self) -> Option<TurnUpdate> {
        self.close_partial(TurnEnd::Failed)
    }

    /// Finalize the partial reply after a cancelled stream
    pub fn on_cancel(&mut self) -> Option<TurnUpdate> {
        self.close_partial(TurnEnd::Cancelled)
    }

    /// Drop all history
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TurnInFlight`] while a reply is streaming.
    pub fn clear(&mut self) -> Result<(), ChatError> {
        if self.is_in_flight() {
            return Err(ChatError::TurnInFlight);
        }
        self.conversation.clear();
        Ok(())
    }

    fn close_partial(&mut self, end: TurnEnd) -> Option<TurnUpdate> {
        let message = self.in_flight.take()?;
        if message.content.is_empty() {
            tracing::debug!(message_id = %message.id, ?end, "Discarding empty reply");
            return Some(TurnUpdate::Discarded {
                message_id: message.id,
                end,
            });
        }
        Some(self.commit(message, end))
    }

    fn commit(&mut self, message: Message, end: TurnEnd) -> TurnUpdate {
        tracing::debug!(
            message_id = %message.id,
            ?end,
            chars = message.content.chars().count(),
            "Reply finalized"
        );
        self.conversation.push(message.clone());
        TurnUpdate::Finalized { message, end }
    }
}
