//! Chat Session
//!
//! Caller-facing driver for one conversation. Ties a [`ChatClient`], a
//! [`ModelSelector`] and a [`TurnAccumulator`] together and runs one turn at a
//! time.
//!
//! # Design Philosophy
//!
//! `send` takes `&mut self`, so two turns can never stream into the same
//! conversation at once. Updates go out over a bounded `mpsc` channel as
//! they happen; a slow renderer slows the stream down instead of buffering an
//! unbounded backlog.
//!
//! The session never retries. A failed turn returns
//! [`Termination::Failed`] and the caller may [`ChatSession::reissue`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::accumulator::{TurnAccumulator, TurnEnd, TurnUpdate};
use crate::client::ChatClient;
use crate::collaborators::{ContextFile, ContextUploader, ModelSelector};
use crate::error::{ChatError, StreamError};
use crate::messages::{Conversation, Message};
use crate::pump::{PumpState, PumpStats};

/// How a turn ended
#[derive(Debug)]
pub enum Termination {
    /// The stream completed
    Completed,
    /// The caller cancelled the stream
    Cancelled,
    /// The stream failed; any partial reply was kept
    Failed(StreamError),
}

impl Termination {
    /// Payload-free form of this termination
    #[must_use]
    pub fn end(&self) -> TurnEnd {
        match self {
            Self::Completed => TurnEnd::Completed,
            Self::Cancelled => TurnEnd::Cancelled,
            Self::Failed(_) => TurnEnd::Failed,
        }
    }

    /// Whether the turn completed normally
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Result of one assistant turn
#[derive(Debug)]
pub struct TurnOutcome {
    /// The finalized reply, `None` if nothing arrived
    pub message: Option<Message>,
    /// How the turn ended
    pub termination: Termination,
    /// Stream counters
    pub stats: PumpStats,
}

/// Single-flight chat driver over an explicit conversation
pub struct ChatSession {
    client: ChatClient,
    selector: Arc<dyn ModelSelector>,
    accumulator: TurnAccumulator,
    updates: Option<mpsc::Sender<TurnUpdate>>,
}

impl ChatSession {
    /// Create a session with an empty conversation
    pub fn new(client: ChatClient, selector: Arc<dyn ModelSelector>) -> Self {
        Self {
            client,
            selector,
            accumulator: TurnAccumulator::default(),
            updates: None,
        }
    }

    /// Continue an existing conversation
    #[must_use]
    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.accumulator = TurnAccumulator::new(conversation);
        self
    }

    /// Publish updates to `tx`
    #[must_use]
    pub fn with_updates(mut self, tx: mpsc::Sender<TurnUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    /// Publish updates to a new channel of `capacity` and return its receiver
    #[must_use]
    pub fn with_update_channel(self, capacity: usize) -> (Self, mpsc::Receiver<TurnUpdate>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.with_updates(tx), rx)
    }

    /// Finalized history
    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        self.accumulator.conversation()
    }

    /// Whether a turn is streaming
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.accumulator.is_in_flight()
    }

    /// The underlying client
    #[must_use]
    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    /// Send a user message and stream the reply
    ///
    /// # Errors
    ///
    /// Fails before anything is sent if the text is blank, no model is
    /// selected, or a turn is already in flight. Stream failures are not
    /// errors here: they come back as [`Termination::Failed`].
    pub async fn send(
        &mut self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if self.is_in_flight() {
            return Err(ChatError::TurnInFlight);
        }
        let model = self.model()?;

        self.accumulator.push_user(text)?;
        self.reply(&model, cancel).await
    }

    /// Re-send the conversation as it stands, without a new user message
    ///
    /// Used after a context upload or to retry a failed turn.
    ///
    /// # Errors
    ///
    /// Same preconditions as [`send`](Self::send); an empty conversation is
    /// [`ChatError::EmptyMessage`].
    pub async fn reissue(&mut self, cancel: CancellationToken) -> Result<TurnOutcome, ChatError> {
        if self.is_in_flight() {
            return Err(ChatError::TurnInFlight);
        }
        if self.conversation().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let model = self.model()?;
        self.reply(&model, cancel).await
    }

    /// Upload files into the server-side context
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TurnInFlight`] while a reply is streaming, or the
    /// uploader's error.
    pub async fn upload_context(
        &self,
        uploader: &dyn ContextUploader,
        files: &[ContextFile],
    ) -> Result<(), ChatError> {
        if self.is_in_flight() {
            return Err(ChatError::TurnInFlight);
        }
        uploader.upload(files).await?;
        tracing::info!(files = files.len(), "Context uploaded");
        Ok(())
    }

    /// Drop local history
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::TurnInFlight`] while a reply is streaming.
    pub fn clear(&mut self) -> Result<(), ChatError> {
        self.accumulator.clear()
    }

    /// Close a turn left open by a dropped `send` future
    pub async fn abandon_turn(&mut self) -> Option<Message> {
        let update = self.accumulator.on_cancel()?;
        let message = finalized(&update);
        self.publish(update).await;
        message
    }

    fn model(&self) -> Result<String, ChatError> {
        self.selector
            .selected_model()
            .filter(|m| !m.trim().is_empty())
            .ok_or(ChatError::NoModel)
    }

    async fn reply(&mut self, model: &str, cancel: CancellationToken) -> Result<TurnOutcome, ChatError> {
        let mut pump = self
            .client
            .open(self.accumulator.conversation().messages(), model, cancel)?;

        let started = self.accumulator.begin()?;
        self.publish(started).await;

        let mut failure = None;
        while let Some(item) = pump.next_token().await {
            match item {
                Ok(token) => {
                    let update = self.accumulator.on_token(&token);
                    self.publish(update).await;
                }
                Err(e) => failure = Some(e),
            }
        }

        let (update, termination) = match failure {
            Some(e) => (self.accumulator.on_error(), Termination::Failed(e)),
            None if pump.state() == PumpState::Cancelled => {
                (self.accumulator.on_cancel(), Termination::Cancelled)
            }
            None => (self.accumulator.on_complete(), Termination::Completed),
        };

        let message = update.as_ref().and_then(finalized);
        if let Some(update) = update {
            self.publish(update).await;
        }

        Ok(TurnOutcome {
            message,
            termination,
            stats: pump.stats().clone(),
        })
    }

    async fn publish(&self, update: TurnUpdate) {
        if let Some(tx) = &self.updates {
            if let Err(mpsc::error::SendError(update)) = tx.send(update).await {
                tracing::debug!(
                    message_id = %update.message_id(),
                    "Update receiver dropped"
                );
            }
        }
    }
}

fn finalized(update: &TurnUpdate) -> Option<Message> {
    match update {
        TurnUpdate::Finalized { message, .. } => Some(message.clone()),
        _ => None,
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("client", &self.client)
            .field("messages", &self.conversation().len())
            .field("in_flight", &self.is_in_flight())
            .finish_non_exhaustive()
    }
}
