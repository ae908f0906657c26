//! Shared test infrastructure: a scripted in-memory transport
//!
//! Bodies are `futures::stream::iter` over byte chunks, optionally followed by
//! a read error or a body that never ends. Every body carries a drop flag so
//! tests can observe the connection being released.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;

use ezchat_core::transport::{
    BodyStream, HttpRequest, Transport, TransportError, TransportResponse,
};

/// What happens after the scripted chunks run out
#[derive(Clone, Debug)]
pub enum Tail {
    /// Clean end of body
    End,
    /// The body never yields again
    Hang,
    /// The connection fails with this message
    Fail(String),
}

/// One canned response
#[derive(Clone, Debug)]
pub struct Script {
    pub status: u16,
    pub chunks: Vec<Bytes>,
    pub tail: Tail,
    pub has_body: bool,
}

impl Script {
    /// 200 response delivering `chunks` as separate reads
    pub fn ok(chunks: &[&str]) -> Self {
        Self::bytes(chunks.iter().map(|c| c.as_bytes().to_vec()).collect())
    }

    /// 200 response delivering raw byte chunks
    pub fn bytes(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            status: 200,
            chunks: chunks.into_iter().map(Bytes::from).collect(),
            tail: Tail::End,
            has_body: true,
        }
    }

    /// The same body split into reads of `size` bytes
    pub fn split(body: &str, size: usize) -> Self {
        Self::bytes(body.as_bytes().chunks(size.max(1)).map(<[u8]>::to_vec).collect())
    }

    /// Non-success response with a text body
    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status,
            ..Self::ok(&[body])
        }
    }

    /// 200 response without a body
    pub fn no_body() -> Self {
        Self {
            has_body: false,
            ..Self::ok(&[])
        }
    }

    /// Keep the body open after the chunks
    pub fn then_hang(mut self) -> Self {
        self.tail = Tail::Hang;
        self
    }

    /// Fail the body after the chunks
    pub fn then_fail(mut self, message: &str) -> Self {
        self.tail = Tail::Fail(message.to_string());
        self
    }
}

/// Body wrapper that flips a flag when dropped
struct TrackedBody {
    inner: BodyStream,
    dropped: Arc<AtomicBool>,
}

impl Stream for TrackedBody {
    type Item = Result<Bytes, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}

impl Drop for TrackedBody {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// Serves scripts in order, repeating the last one
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    last: Mutex<Option<Script>>,
    pub issued: AtomicUsize,
    pub body_dropped: Arc<AtomicBool>,
    pub requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: Script) -> Arc<Self> {
        Self::sequence(vec![script])
    }

    pub fn sequence(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            last: Mutex::new(None),
            issued: AtomicUsize::new(0),
            body_dropped: Arc::new(AtomicBool::new(false)),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn body_dropped(&self) -> bool {
        self.body_dropped.load(Ordering::SeqCst)
    }

    /// JSON body of the `index`-th request
    pub fn request_json(&self, index: usize) -> serde_json::Value {
        let requests = self.requests.lock();
        let body = requests[index].body.clone().unwrap_or_default();
        serde_json::from_slice(&body).unwrap()
    }

    fn next_script(&self) -> Script {
        let next = self.scripts.lock().pop_front();
        let mut last = self.last.lock();
        if let Some(script) = next {
            *last = Some(script);
        }
        last.clone().unwrap_or_else(|| Script::ok(&[]))
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn issue(&self, request: HttpRequest) -> Result<TransportResponse, TransportError> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);
        self.body_dropped.store(false, Ordering::SeqCst);

        let script = self.next_script();
        if !script.has_body {
            return Ok(TransportResponse {
                status: script.status,
                body: None,
            });
        }

        let head = futures::stream::iter(
            script
                .chunks
                .into_iter()
                .map(Ok::<Bytes, TransportError>),
        );
        let inner: BodyStream = match script.tail {
            Tail::End => Box::pin(head),
            Tail::Hang => Box::pin(head.chain(futures::stream::pending())),
            Tail::Fail(message) => Box::pin(head.chain(futures::stream::once(async move {
                Err(TransportError::Io(message))
            }))),
        };

        Ok(TransportResponse {
            status: script.status,
            body: Some(Box::pin(TrackedBody {
                inner,
                dropped: Arc::clone(&self.body_dropped),
            })),
        })
    }
}
