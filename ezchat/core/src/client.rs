//! Chat Client
//!
//! Builds chat-completion requests and opens a [`StreamPump`] over them. The
//! client is stateless with respect to the conversation: history is passed in
//! on every call and nothing is retained between turns.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::messages::{ChatRequestBody, Message};
use crate::pump::{StreamOptions, StreamPump};
use crate::transport::{HttpRequest, HttpTransport, Transport};

/// Opens streaming chat-completion requests
#[derive(Clone)]
pub struct ChatClient {
    transport: Arc<dyn Transport>,
    chat_url: String,
    system_prompt: Option<String>,
    options: StreamOptions,
}

impl ChatClient {
    /// Client posting to `chat_url` through `transport`
    pub fn new(transport: Arc<dyn Transport>, chat_url: impl Into<String>) -> Self {
        Self {
            transport,
            chat_url: chat_url.into(),
            system_prompt: None,
            options: StreamOptions::default(),
        }
    }

    /// Client over HTTP configured from `config`
    ///
    /// # Errors
    ///
    /// Fails if the configuration is invalid or the HTTP client cannot be
    /// built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ChatError> {
        config.validate()?;
        let transport = HttpTransport::new(config.connect_timeout())?;
        Ok(Self::new(Arc::new(transport), config.chat_url())
            .with_options(config.stream_options())
            .with_system_prompt(config.system_prompt.clone()))
    }

    /// Set the per-stream options
    #[must_use]
    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Send `prompt` as a leading system message of every request
    #[must_use]
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    /// Shared transport
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Chat endpoint URL
    #[must_use]
    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    /// Per-stream options
    #[must_use]
    pub fn options(&self) -> StreamOptions {
        self.options
    }

    /// Stream the reply to `conversation` followed by `text`
    ///
    /// The returned pump is lazy: nothing is sent until it is first polled.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::EmptyMessage`] for blank input and
    /// [`ChatError::NoModel`] for a blank model.
    pub fn send(
        &self,
        conversation: &[Message],
        text: &str,
        model: &str,
        cancel: CancellationToken,
    ) -> Result<StreamPump, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let user = Message::user(text);
        self.open(conversation.iter().chain(std::iter::once(&user)), model, cancel)
    }

    /// Stream the reply to `history` as it stands
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NoModel`] for a blank model, or a transport error
    /// if the request body cannot be encoded.
    pub fn open<'a>(
        &self,
        history: impl IntoIterator<Item = &'a Message>,
        model: &str,
        cancel: CancellationToken,
    ) -> Result<StreamPump, ChatError> {
        if model.trim().is_empty() {
            return Err(ChatError::NoModel);
        }

        let body = ChatRequestBody::new(model, self.system_prompt.as_deref(), history);
        tracing::debug!(model = %model, messages = body.messages.len(), "Preparing chat request");

        let request = HttpRequest::post_json(&self.chat_url, &body)?
            .with_header("Accept", "text/event-stream, application/x-ndjson");

        Ok(StreamPump::open(
            Arc::clone(&self.transport),
            request,
            self.options,
            cancel,
        ))
    }
}

impl std::fmt::Debug for ChatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatClient")
            .field("chat_url", &self.chat_url)
            .field("system_prompt", &self.system_prompt.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::WireFormat;
    use crate::pump::PumpState;
    use crate::transport::{TransportError, TransportResponse};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct CapturingTransport {
        bodies: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl Transport for CapturingTransport {
        async fn issue(&self, request: HttpRequest) -> Result<TransportResponse, TransportError> {
            let body = request.body.unwrap_or_default();
            self.bodies.lock().push(serde_json::from_slice(&body).unwrap());
            let chunk: Result<Bytes, TransportError> = Ok(Bytes::from_static(b"data: ok\n\n"));
            Ok(TransportResponse {
                status: 200,
                body: Some(Box::pin(futures::stream::iter(vec![chunk]))),
            })
        }
    }

    #[tokio::test]
    async fn test_send_appends_user_text_to_history() {
        let transport = Arc::new(CapturingTransport::default());
        let client = ChatClient::new(transport.clone(), "http://host/v1/chat/completions")
            .with_options(StreamOptions::default().with_wire_format(WireFormat::SseText))
            .with_system_prompt(Some("Be brief".to_string()));

        let history = vec![Message::user("Hi"), Message::assistant("Hello")];
        let mut pump = client
            .send(&history, "How are you?", "llama3", CancellationToken::new())
            .unwrap();

        assert_eq!(pump.state(), PumpState::Idle);
        assert!(transport.bodies.lock().is_empty());

        let token = pump.next_token().await.unwrap().unwrap();
        assert_eq!(token.as_str(), "ok");

        let bodies = transport.bodies.lock();
        assert_eq!(
            bodies[0],
            serde_json::json!({
                "model": "llama3",
                "messages": [
                    {"role": "system", "content": "Be brief"},
                    {"role": "user", "content": "Hi"},
                    {"role": "assistant", "content": "Hello"},
                    {"role": "user", "content": "How are you?"}
                ],
                "stream": true
            })
        );
    }

    #[test]
    fn test_send_validates_input() {
        let client = ChatClient::new(Arc::new(CapturingTransport::default()), "http://host/chat");

        let blank = client.send(&[], "   ", "m", CancellationToken::new());
        assert!(matches!(blank, Err(ChatError::EmptyMessage)));

        let no_model = client.send(&[], "hi", "", CancellationToken::new());
        assert!(matches!(no_model, Err(ChatError::NoModel)));
    }

    #[test]
    fn test_blank_system_prompt_is_dropped() {
        let client = ChatClient::new(Arc::new(CapturingTransport::default()), "http://host/chat")
            .with_system_prompt(Some("  ".to_string()));
        assert!(client.system_prompt.is_none());
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let mut config = ClientConfig::default();
        config.chat_path = "no-slash".to_string();
        assert!(matches!(
            ChatClient::from_config(&config),
            Err(ChatError::Config(_))
        ));
    }
}
