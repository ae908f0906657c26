//! Stream Pump
//!
//! Owns the read loop of one chat-completion response: pulls chunks from the
//! transport, decodes frames, adapts records and hands tokens to the consumer
//! one at a time.
//!
//! # Lifecycle
//!
//! ```text
//!   Idle ──issue──► Reading ──end of body──► Draining ──► Done
//!    │                │
//!    │                ├──[DONE] / done:true──────────────► Done
//!    │                ├──cancel──────────────────────────► Cancelled
//!    └──non-2xx──┐    └──read error / error frame────────► Errored
//!                └───────────────────────────────────────► Errored
//! ```
//!
//! Terminal states are final. A new turn needs a new pump.
//!
//! # Design Philosophy
//!
//! The pump is lazy: constructing it does no I/O, the request goes out on the
//! first poll. Between polls it does nothing, so a consumer that stops
//! polling applies back-pressure all the way to the socket.
//!
//! Cancellation is cooperative. The [`CancellationToken`] is checked at the top
//! of every poll and raced against every await point. On cancellation the
//! response body is dropped, which releases the connection, and tokens that
//! were decoded but not yet yielded are discarded.

use std::collections::VecDeque;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::error::{StreamError, ERROR_BODY_LIMIT};
use crate::format::{Adapted, WireFormat};
use crate::framing::{FrameDecoder, Utf8Decoder, DEFAULT_MAX_FRAME_BYTES};
use crate::messages::Token;
use crate::transport::{collect_body, BodyStream, HttpRequest, Transport, TransportError};

/// Tokens of one reply as a `futures::Stream`
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<Token, StreamError>> + Send>>;

// ============================================================================
// Options
// ============================================================================

/// Per-stream settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamOptions {
    /// Framing and payload format of the response
    pub wire_format: WireFormat,
    /// Longest a single body read may stall (`None` waits forever)
    pub read_timeout: Option<Duration>,
    /// Upper bound on an unterminated frame
    pub max_frame_bytes: usize,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            wire_format: WireFormat::default(),
            read_timeout: None,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl StreamOptions {
    /// Set the wire format
    #[must_use]
    pub fn with_wire_format(mut self, wire_format: WireFormat) -> Self {
        self.wire_format = wire_format;
        self
    }

    /// Set the idle read timeout
    #[must_use]
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the frame size limit
    #[must_use]
    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }
}

// ============================================================================
// State
// ============================================================================

/// Pump lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpState {
    /// Constructed, request not yet issued
    Idle,
    /// Reading the response body
    Reading,
    /// Body ended, flushing the trailing buffer
    Draining,
    /// Stream completed normally
    Done,
    /// Stream aborted by the caller
    Cancelled,
    /// Stream failed
    Errored,
}

impl PumpState {
    /// Whether no further reads will happen
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Errored)
    }
}

impl fmt::Display for PumpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::Draining => "draining",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Counters for one stream
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Body bytes received
    pub bytes_read: u64,
    /// Records produced by the frame decoder
    pub frames_decoded: u64,
    /// Tokens handed to the consumer
    pub tokens_yielded: u64,
    /// Records skipped as malformed
    pub malformed_frames: u64,
    /// Time from issuing the request to the first yielded token
    pub time_to_first_token: Option<Duration>,
    /// Time from issuing the request to the terminal state
    pub duration: Option<Duration>,
}

// ============================================================================
// Pump
// ============================================================================

/// Lazy, cancellable token sequence over one streaming response
pub struct StreamPump {
    transport: Arc<dyn Transport>,
    request: Option<HttpRequest>,
    format: WireFormat,
    read_timeout: Option<Duration>,
    cancel: CancellationToken,
    state: PumpState,
    body: Option<BodyStream>,
    utf8: Utf8Decoder,
    decoder: FrameDecoder,
    pending: VecDeque<Token>,
    failure: Option<StreamError>,
    stats: PumpStats,
    started: Option<Instant>,
    reported: bool,
}

impl StreamPump {
    /// Prepare a stream for `request`; nothing is sent until the first poll
    #[must_use]
    pub fn open(
        transport: Arc<dyn Transport>,
        request: HttpRequest,
        options: StreamOptions,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            request: Some(request),
            format: options.wire_format,
            read_timeout: options.read_timeout,
            cancel,
            state: PumpState::Idle,
            body: None,
            utf8: Utf8Decoder::new(),
            decoder: FrameDecoder::with_limit(
                options.wire_format.delimiter(),
                options.max_frame_bytes,
            ),
            pending: VecDeque::new(),
            failure: None,
            stats: PumpStats::default(),
            started: None,
            reported: false,
        }
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> PumpState {
        self.state
    }

    /// Counters so far
    #[must_use]
    pub fn stats(&self) -> &PumpStats {
        &self.stats
    }

    /// Wire format this pump decodes
    #[must_use]
    pub fn wire_format(&self) -> WireFormat {
        self.format
    }

    /// Token that aborts this stream
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Yield the next token
    ///
    /// Returns `Some(Err(_))` at most once, for the failure that ended the
    /// stream, and `None` once the stream is over. Cancellation ends the
    /// sequence without an error.
    pub async fn next_token(&mut self) -> Option<Result<Token, StreamError>> {
        loop {
            if self.cancel.is_cancelled() && !self.is_exhausted() {
                self.enter_cancelled();
            }

            if let Some(token) = self.pending.pop_front() {
                self.record_yield();
                return Some(Ok(token));
            }

            if let Some(error) = self.failure.take() {
                return Some(Err(error));
            }

            match self.state {
                PumpState::Idle => self.issue().await,
                PumpState::Reading => self.read().await,
                PumpState::Draining => self.drain(),
                PumpState::Done | PumpState::Cancelled | PumpState::Errored => {
                    self.report();
                    return None;
                }
            }
        }
    }

    /// Adapt into a `futures::Stream`
    #[must_use]
    pub fn into_stream(self) -> TokenStream {
        Box::pin(futures::stream::unfold(self, |mut pump| async move {
            pump.next_token().await.map(|item| (item, pump))
        }))
    }

    fn is_exhausted(&self) -> bool {
        self.state.is_terminal() && self.pending.is_empty() && self.failure.is_none()
    }

    async fn issue(&mut self) {
        let Some(request) = self.request.take() else {
            self.fail(StreamError::MissingBody);
            return;
        };

        self.started = Some(Instant::now());
        tracing::debug!(
            endpoint = %request.endpoint,
            format = %self.format,
            "Opening stream"
        );

        let transport = Arc::clone(&self.transport);
        let cancel = self.cancel.clone();
        let issued = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = transport.issue(request) => Some(result),
        };

        let response = match issued {
            None => return,
            Some(Err(e)) => {
                self.fail(StreamError::Transport(e));
                return;
            }
            Some(Ok(response)) => response,
        };

        if !response.is_success() {
            let body = match response.body {
                Some(body) => {
                    Self::read_error_body(self.cancel.clone(), body, self.read_timeout).await
                }
                None => String::new(),
            };
            tracing::warn!(status = response.status, body = %body, "Request rejected");
            self.fail(StreamError::RequestFailed {
                status: response.status,
                body,
            });
            return;
        }

        let Some(body) = response.body else {
            tracing::warn!(status = response.status, "Response has no body");
            self.fail(StreamError::MissingBody);
            return;
        };

        tracing::debug!(status = response.status, "Streaming response");
        self.body = Some(body);
        self.state = PumpState::Reading;
    }

    /// Start of a rejected response's body; empty if it stalls or is cancelled
    async fn read_error_body(
        cancel: CancellationToken,
        body: BodyStream,
        read_timeout: Option<Duration>,
    ) -> String {
        let collect = collect_body(body, ERROR_BODY_LIMIT);
        let collected = tokio::select! {
            biased;
            () = cancel.cancelled() => return String::new(),
            collected = async {
                match read_timeout {
                    Some(limit) => tokio::time::timeout(limit, collect)
                        .await
                        .unwrap_or(Err(TransportError::Timeout)),
                    None => collect.await,
                }
            } => collected,
        };
        collected
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }

    async fn read(&mut self) {
        let Some(body) = self.body.as_mut() else {
            self.state = PumpState::Draining;
            return;
        };

        let cancel = self.cancel.clone();
        let read_timeout = self.read_timeout;
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            next = next_chunk(body, read_timeout) => next,
        };

        match next {
            Some(Ok(bytes)) => {
                self.stats.bytes_read += bytes.len() as u64;
                let text = self.utf8.decode(&bytes);
                self.ingest(&text);
            }
            Some(Err(e)) => self.fail(StreamError::Transport(e)),
            None => {
                tracing::debug!("End of body");
                self.body = None;
                self.state = PumpState::Draining;
            }
        }
    }

    fn drain(&mut self) {
        let tail = self.utf8.finish();
        if !tail.is_empty() {
            self.ingest(&tail);
        }

        if !self.state.is_terminal() {
            if let Some(record) = self.decoder.finish() {
                self.handle_record(&record);
            }
        }

        if !self.state.is_terminal() {
            self.finish(PumpState::Done);
        }
    }

    fn ingest(&mut self, text: &str) {
        let pushed = self.decoder.push(text);
        for record in pushed.records {
            if !self.handle_record(&record) {
                return;
            }
        }
        if let Some(overflow) = pushed.overflow {
            self.fail(StreamError::FrameTooLarge(overflow));
        }
    }

    /// Returns false once the record ended the stream
    fn handle_record(&mut self, record: &str) -> bool {
        self.stats.frames_decoded += 1;

        match self.format.adapt(record) {
            Adapted::Token(token) => {
                self.pending.push_back(token);
                true
            }
            Adapted::Skip => true,
            Adapted::Malformed(frame) => {
                self.stats.malformed_frames += 1;
                tracing::warn!(
                    reason = %frame.reason,
                    excerpt = %frame.excerpt,
                    "Skipping malformed frame"
                );
                true
            }
            Adapted::Done(last) => {
                self.pending.extend(last);
                self.finish(PumpState::Done);
                false
            }
            Adapted::Failed(message) => {
                self.fail(StreamError::Backend(message));
                false
            }
        }
    }

    fn record_yield(&mut self) {
        if self.stats.tokens_yielded == 0 {
            self.stats.time_to_first_token = self.started.map(|t| t.elapsed());
        }
        self.stats.tokens_yielded += 1;
    }

    fn enter_cancelled(&mut self) {
        let discarded = self.pending.len();
        self.pending.clear();
        self.failure = None;
        tracing::debug!(from = %self.state, discarded, "Stream cancelled");
        self.finish(PumpState::Cancelled);
    }

    fn fail(&mut self, error: StreamError) {
        tracing::warn!(error = %error, from = %self.state, "Stream failed");
        self.finish(PumpState::Errored);
        self.failure = Some(error);
    }

    fn finish(&mut self, state: PumpState) {
        // Dropping the body closes the connection.
        self.body = None;
        self.state = state;
        self.stats.duration = self.started.map(|t| t.elapsed());
    }

    fn report(&mut self) {
        if self.reported {
            return;
        }
        self.reported = true;
        tracing::debug!(
            state = %self.state,
            bytes = self.stats.bytes_read,
            frames = self.stats.frames_decoded,
            tokens = self.stats.tokens_yielded,
            malformed = self.stats.malformed_frames,
            ttft_ms = self.stats.time_to_first_token.map(|d| d.as_millis() as u64),
            duration_ms = self.stats.duration.map(|d| d.as_millis() as u64),
            "Stream finished"
        );
    }
}

impl fmt::Debug for StreamPump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPump")
            .field("state", &self.state)
            .field("format", &self.format)
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

async fn next_chunk(
    body: &mut BodyStream,
    read_timeout: Option<Duration>,
) -> Option<Result<Bytes, TransportError>> {
    match read_timeout {
        Some(limit) => tokio::time::timeout(limit, body.next())
            .await
            .unwrap_or(Some(Err(TransportError::Timeout))),
        None => body.next().await,
    }
}
