//! Error Types
//!
//! `StreamError` is what a token sequence terminates with. `ChatError` is what
//! the caller-facing API returns. A malformed record is neither: it is logged,
//! counted in [`PumpStats`](crate::pump::PumpStats) and skipped.

use thiserror::Error;

use crate::config::ConfigError;
use crate::framing::FrameTooLarge;
use crate::transport::TransportError;

/// Largest slice of a non-2xx response body kept in [`StreamError::RequestFailed`]
pub const ERROR_BODY_LIMIT: usize = 4 * 1024;

/// Terminal failure of a token sequence
#[derive(Debug, Error)]
pub enum StreamError {
    /// The server answered with a non-success status
    #[error("Request failed with status {status}: {body}")]
    RequestFailed {
        /// HTTP status code
        status: u16,
        /// Start of the response body
        body: String,
    },

    /// The response carried no body to stream
    #[error("Response has no body")]
    MissingBody,

    /// The connection failed or timed out
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame grew beyond the configured limit without a delimiter
    #[error(transparent)]
    FrameTooLarge(#[from] FrameTooLarge),

    /// The backend reported a failure inside the stream
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StreamError {
    /// Whether the failure came from the connection rather than the server
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Whether the stream failed before producing anything
    #[must_use]
    pub fn is_request_failure(&self) -> bool {
        matches!(self, Self::RequestFailed { .. } | Self::MissingBody)
    }
}

/// Errors from the caller-facing chat API
#[derive(Debug, Error)]
pub enum ChatError {
    /// An assistant turn is still streaming
    #[error("An assistant reply is still in flight")]
    TurnInFlight,

    /// The user message is empty
    #[error("Message is empty")]
    EmptyMessage,

    /// No model has been selected
    #[error("No model selected")]
    NoModel,

    /// The reply stream failed
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// A non-streaming request failed at the transport
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A response could not be decoded
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Context upload was rejected
    #[error("Upload failed: {0}")]
    Upload(String),
}
