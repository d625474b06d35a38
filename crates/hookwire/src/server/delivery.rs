//! Conversion of a [`Delivery`] into an HTTP response.

use super::builder::{full_body, HookwireBody, SimpleResponseBuilder};
use crate::context::{BodyStream, Canceller, Delivery, ResponseBody, StreamError};
use crate::error::InterceptError;
use crate::headers::{
    strip_hop_by_hop, HookwireHeadersExt, X_HOOKWIRE_CACHE_POLICY, X_HOOKWIRE_SOURCE,
};
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use http_body_util::{BodyExt, StreamBody};
use hyper::body::Frame;
use hyper::header::{HeaderValue, CONTENT_LENGTH};
use hyper::{Response, StatusCode};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::warn;

/// Cancels the request when dropped.
///
/// Held while waiting for a delivery and for as long as a streamed body is
/// being written, so a client that goes away stops the handler or relay.
/// Cancelling a finished request is a no-op.
pub(crate) struct CancelOnDrop(Canceller);

impl CancelOnDrop {
    pub(crate) fn new(canceller: Canceller) -> Self {
        Self(canceller)
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

struct GuardedStream {
    inner: BodyStream,
    _guard: CancelOnDrop,
}

impl Stream for GuardedStream {
    type Item = Result<Bytes, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Build the response for a delivery, tagged with `source`.
pub(crate) fn into_response(
    delivery: Delivery,
    source: &HeaderValue,
    guard: CancelOnDrop,
) -> Response<HookwireBody> {
    match delivery {
        Delivery::Response { head, body } => {
            let mut headers = head.headers;
            strip_hop_by_hop(&mut headers);

            let body = match body {
                ResponseBody::Full(bytes) => {
                    headers.remove(CONTENT_LENGTH);
                    full_body(bytes)
                }
                ResponseBody::Streaming(stream) => {
                    let guarded = GuardedStream {
                        inner: stream,
                        _guard: guard,
                    };
                    StreamBody::new(guarded.map_ok(Frame::data)).boxed_unsync()
                }
            };

            let mut response = Response::new(body);
            *response.status_mut() = head.status;
            *response.headers_mut() = headers;
            response.set_header(&X_HOOKWIRE_SOURCE, source);
            response.set_header(
                &X_HOOKWIRE_CACHE_POLICY,
                &HeaderValue::from_static(head.cache_policy.as_str()),
            );
            response
        }
        Delivery::Failed(InterceptError::Transport(err)) => {
            warn!("Upstream failed: {}", err);
            SimpleResponseBuilder::new(StatusCode::BAD_GATEWAY)
                .body(format!("Bad Gateway: {err}"))
                .source(source)
                .build()
        }
        Delivery::Failed(err) => {
            warn!("Intercepted request failed: {}", err);
            SimpleResponseBuilder::new(StatusCode::INTERNAL_SERVER_ERROR)
                .body(format!("Internal Server Error: {err}"))
                .source(source)
                .build()
        }
        Delivery::Cancelled => SimpleResponseBuilder::new(StatusCode::SERVICE_UNAVAILABLE)
            .body("Request cancelled")
            .source(source)
            .build(),
    }
}
