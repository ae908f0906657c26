//! HTTP transport on reqwest
//!
//! Streams response bodies with `bytes_stream()`. Only the connect phase has a
//! timeout here: a chat reply may legitimately take minutes, so read idleness
//! is policed by the pump instead.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;

use super::{HttpRequest, Method, Transport, TransportError, TransportResponse};

/// [`Transport`] backed by a shared `reqwest::Client`
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport with the given connect timeout
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if the TLS backend or the
    /// client cannot be initialized.
    pub fn new(connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn issue(&self, request: HttpRequest) -> Result<TransportResponse, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        };

        let mut builder = self.client.request(method, &request.endpoint);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        tracing::debug!(
            method = %request.method,
            endpoint = %request.endpoint,
            "Issuing request"
        );

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();

        let body = if response.content_length() == Some(0) {
            None
        } else {
            let stream = response
                .bytes_stream()
                .map(|chunk| chunk.map_err(map_reqwest_error));
            Some(Box::pin(stream) as super::BodyStream)
        };

        Ok(TransportResponse { status, body })
    }
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else if error.is_builder() {
        TransportError::InvalidRequest(error.to_string())
    } else {
        TransportError::Io(error.to_string())
    }
}
