//! Transport Layer
//!
//! The streaming core never talks to the network directly. It issues an
//! [`HttpRequest`] through a [`Transport`] and reads the response body as a
//! sequence of byte chunks.
//!
//! # Design Philosophy
//!
//! Keeping the transport behind a trait lets the pump be driven by a real
//! HTTP client ([`HttpTransport`]) or by scripted in-memory bodies in tests,
//! with identical framing and cancellation behavior.
//!
//! Dropping a [`BodyStream`] closes the underlying connection. The pump drops
//! the body on every terminal transition, including cancellation.

mod http;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};

pub use http::HttpTransport;

/// Sequential chunked reads from a response body
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Transport-level failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Could not reach the peer
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The peer stopped responding in time
    #[error("Timed out waiting for the server")]
    Timeout,

    /// The connection failed mid-transfer
    #[error("IO error: {0}")]
    Io(String),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// HTTP method
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

impl Method {
    /// Method name on the wire
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to issue through a [`Transport`]
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Absolute URL
    pub endpoint: String,
    /// HTTP method
    pub method: Method,
    /// Header name/value pairs
    pub headers: Vec<(String, String)>,
    /// Request body
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Build a GET request
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: Method::Get,
            headers: Vec::new(),
            body: None,
        }
    }

    /// Build a POST request with a JSON body
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidRequest`] if `body` fails to serialize.
    pub fn post_json<T: serde::Serialize + ?Sized>(
        endpoint: impl Into<String>,
        body: &T,
    ) -> Result<Self, TransportError> {
        let body =
            serde_json::to_vec(body).map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            method: Method::Post,
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body),
        })
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Look up a header value (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Status line and body of a response
pub struct TransportResponse {
    /// HTTP status code
    pub status: u16,
    /// Body, if the response carries one
    pub body: Option<BodyStream>,
}

impl TransportResponse {
    /// Whether the status is 2xx
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}

/// Issues HTTP requests and hands back streaming bodies
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and return as soon as the status is known
    async fn issue(&self, request: HttpRequest) -> Result<TransportResponse, TransportError>;
}

/// Read a body to the end, keeping at most `limit` bytes
///
/// Used for small responses (error bodies, model lists); the streaming path
/// never buffers a whole body.
///
/// # Errors
///
/// Propagates the first read error.
pub async fn collect_body(mut body: BodyStream, limit: usize) -> Result<Vec<u8>, TransportError> {
    let mut out = Vec::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let room = limit.saturating_sub(out.len());
        out.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if out.len() >= limit {
            break;
        }
    }
    Ok(out)
}
