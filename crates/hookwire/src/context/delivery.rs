//! Consumer side of a response context.
//!
//! The consumer receives exactly one [`Delivery`] per intercepted request.
//! Streaming bodies arrive as a [`BodyStream`] that ends with either a clean
//! end-of-stream or a single terminal error.

use super::responder::Shared;
use super::state::CachePolicy;
use crate::error::InterceptError;
use bytes::{Bytes, BytesMut};
use futures::Stream;
use hyper::{HeaderMap, StatusCode};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// Response metadata committed by a handler.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub cache_policy: CachePolicy,
}

/// What the consumer receives for an intercepted request.
pub enum Delivery {
    Response {
        head: ResponseHead,
        body: ResponseBody,
    },
    /// The request failed before any response metadata was committed
    Failed(InterceptError),
    /// The request was cancelled before any response metadata was committed
    Cancelled,
}

impl Delivery {
    pub fn is_response(&self) -> bool {
        matches!(self, Delivery::Response { .. })
    }

    /// Outcome label used for metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            Delivery::Response {
                body: ResponseBody::Full(_),
                ..
            } => "response",
            Delivery::Response {
                body: ResponseBody::Streaming(_),
                ..
            } => "streaming",
            Delivery::Failed(_) => "failed",
            Delivery::Cancelled => "cancelled",
        }
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Delivery::Response { head, body } => f
                .debug_struct("Response")
                .field("head", head)
                .field("body", body)
                .finish(),
            Delivery::Failed(err) => f.debug_tuple("Failed").field(err).finish(),
            Delivery::Cancelled => f.write_str("Cancelled"),
        }
    }
}

/// Body of a delivered response.
pub enum ResponseBody {
    /// Complete body, delivered together with the head
    Full(Bytes),
    /// Chunks relayed as they arrive
    Streaming(BodyStream),
}

impl ResponseBody {
    /// Collect the whole body, waiting for a streamed body to finish.
    pub async fn collect(self) -> Result<Bytes, StreamError> {
        match self {
            ResponseBody::Full(bytes) => Ok(bytes),
            ResponseBody::Streaming(stream) => stream.collect_bytes().await,
        }
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Full(bytes) => write!(f, "Full({} bytes)", bytes.len()),
            ResponseBody::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// Terminal error of a streamed body.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Stream failed: {0}")]
    Failed(InterceptError),
    #[error("Stream cancelled")]
    Cancelled,
}

pub(crate) enum StreamEvent {
    Data(Bytes),
    End,
    Error(InterceptError),
    Cancelled,
}

/// Ordered body chunks of a piped response.
///
/// Yields `Ok` chunks in the order they were piped, then either ends or
/// yields one `Err` and ends.
pub struct BodyStream {
    rx: mpsc::UnboundedReceiver<StreamEvent>,
    finished: bool,
}

impl BodyStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<StreamEvent>) -> Self {
        Self {
            rx,
            finished: false,
        }
    }

    /// Drain the stream into a single buffer.
    pub async fn collect_bytes(mut self) -> Result<Bytes, StreamError> {
        use futures::StreamExt;

        let mut buf = BytesMut::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }
}

impl Stream for BodyStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(StreamEvent::Data(bytes))) => Poll::Ready(Some(Ok(bytes))),
            Poll::Ready(Some(StreamEvent::End)) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Ready(Some(StreamEvent::Error(err))) => {
                self.finished = true;
                Poll::Ready(Some(Err(StreamError::Failed(err))))
            }
            Poll::Ready(Some(StreamEvent::Cancelled)) => {
                self.finished = true;
                Poll::Ready(Some(Err(StreamError::Cancelled)))
            }
            // Every sender dropped without a terminal event
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(Err(StreamError::Failed(InterceptError::Abandoned))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Cancels a response context from outside its handler.
///
/// Holds a weak reference; cancelling a context that no longer exists is a
/// no-op.
#[derive(Clone)]
pub struct Canceller {
    shared: Weak<Shared>,
}

impl Canceller {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }

    /// Returns `true` if this call moved the context to `Cancelled`.
    pub fn cancel(&self) -> bool {
        match self.shared.upgrade() {
            Some(shared) => shared.cancel(),
            None => false,
        }
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceller")
            .field("live", &(self.shared.strong_count() > 0))
            .finish()
    }
}

/// Consumer handle for one intercepted request. Await it for the [`Delivery`].
pub struct ResponseHandle {
    rx: oneshot::Receiver<Delivery>,
    canceller: Canceller,
}

impl ResponseHandle {
    pub(crate) fn new(rx: oneshot::Receiver<Delivery>, canceller: Canceller) -> Self {
        Self { rx, canceller }
    }

    /// Cancel the request (the "stop loading" signal).
    pub fn cancel(&self) -> bool {
        self.canceller.cancel()
    }

    pub fn canceller(&self) -> Canceller {
        self.canceller.clone()
    }

    /// Non-blocking check for a delivery. Once this returns `Some`, the
    /// handle must not be awaited again.
    pub fn try_delivery(&mut self) -> Option<Delivery> {
        match self.rx.try_recv() {
            Ok(delivery) => Some(delivery),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => {
                Some(Delivery::Failed(InterceptError::Abandoned))
            }
        }
    }
}

impl Future for ResponseHandle {
    type Output = Delivery;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Delivery::Failed(InterceptError::Abandoned)))
    }
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("canceller", &self.canceller)
            .finish()
    }
}
