//! Incremental relay of an upstream response into a response context.
//!
//! A relay session only tracks whether the head has been committed and
//! whether the session has terminated. Chunks are forwarded in arrival order
//! as soon as they are read; if the upstream body fails midway, the bytes
//! already forwarded stay delivered and the stream ends with an error.

use crate::context::{Phase, ResponseContext};
use crate::error::InterceptError;
use crate::upstream::{UpstreamResponse, UpstreamTransport};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use hyper::{HeaderMap, StatusCode};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Summary of a finished relay, reported to completion callbacks.
#[derive(Debug, Clone, Default)]
pub struct RelayOutcome {
    pub status: Option<StatusCode>,
    pub headers: Option<HeaderMap>,
    /// Complete body, when the relay was collecting
    pub body: Option<Bytes>,
    pub bytes_relayed: u64,
    pub error: Option<InterceptError>,
    pub cancelled: bool,
}

impl RelayOutcome {
    /// Label used for metrics.
    pub fn label(&self) -> &'static str {
        if self.cancelled {
            "cancelled"
        } else if self.error.is_some() {
            "failed"
        } else {
            "completed"
        }
    }
}

/// Streams one upstream response into a [`ResponseContext`].
///
/// Creating a relay adds a stop-loading callback so that a cancelled
/// request stops reading from upstream. A callback the handler registered
/// before the relay was created still runs; one registered afterwards with
/// [`ResponseContext::handle_stop_loading_request`] replaces the relay's.
pub struct PipeRelay {
    context: ResponseContext,
    stop: Arc<Notify>,
    headers_committed: bool,
    terminated: bool,
    collected: Option<BytesMut>,
    outcome: RelayOutcome,
}

impl PipeRelay {
    pub fn new(context: ResponseContext) -> Self {
        let stop = Arc::new(Notify::new());
        let notify = Arc::clone(&stop);
        context.chain_stop_loading_request(move || notify.notify_one());
        Self {
            context,
            stop,
            headers_committed: false,
            terminated: false,
            collected: None,
            outcome: RelayOutcome::default(),
        }
    }

    /// Keep a copy of the relayed body for [`RelayOutcome::body`].
    pub fn collecting(mut self, collect: bool) -> Self {
        self.collected = collect.then(BytesMut::new);
        self
    }

    pub fn headers_committed(&self) -> bool {
        self.headers_committed
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Commit the upstream head. Only the first call has any effect.
    pub fn commit(&mut self, status: StatusCode, headers: &HeaderMap) -> bool {
        if self.headers_committed || self.check_terminated() {
            return false;
        }
        // StatusCode is always in range, so pipe_response cannot reject it
        let _ = self.context.pipe_response(status.as_u16(), headers);
        self.headers_committed = self.context.phase() == Phase::Delivering;
        if self.headers_committed {
            self.outcome.status = Some(status);
            self.outcome.headers = Some(headers.clone());
        }
        self.headers_committed
    }

    /// Forward one chunk. Returns `false` once the session has terminated.
    pub fn push(&mut self, chunk: Bytes) -> bool {
        if !self.headers_committed || self.check_terminated() {
            return false;
        }
        self.outcome.bytes_relayed += chunk.len() as u64;
        if let Some(buf) = self.collected.as_mut() {
            buf.extend_from_slice(&chunk);
        }
        self.context.pipe_data(chunk);
        true
    }

    /// End the body normally.
    pub fn finish(&mut self) {
        if self.check_terminated() {
            return;
        }
        self.terminated = true;
        self.context.pipe_end();
    }

    /// End with an error. Bytes already pushed stay delivered.
    pub fn fail(&mut self, err: InterceptError) {
        if self.check_terminated() {
            return;
        }
        self.terminated = true;
        self.outcome.error = Some(err.clone());
        self.context.pipe_error(err);
    }

    fn check_terminated(&mut self) -> bool {
        if !self.terminated && self.context.is_terminal() {
            self.terminated = true;
            self.outcome.cancelled = self.context.is_cancelled();
        }
        self.terminated
    }

    /// Fetch `transport` and relay the response, stopping early on cancellation.
    pub async fn run(mut self, transport: &dyn UpstreamTransport) -> RelayOutcome {
        let request = Arc::clone(self.context.request());
        let stop = Arc::clone(&self.stop);
        let fetched = tokio::select! {
            fetched = transport.fetch(&request) => fetched,
            _ = stop.notified() => return self.into_outcome(),
        };
        match fetched {
            Ok(response) => self.relay(response).await,
            Err(err) => {
                self.fail(InterceptError::Transport(err));
                self.into_outcome()
            }
        }
    }

    /// Relay an upstream response that has already arrived.
    pub async fn relay(mut self, response: UpstreamResponse) -> RelayOutcome {
        let UpstreamResponse {
            status,
            headers,
            mut body,
        } = response;
        if !self.commit(status, &headers) {
            return self.into_outcome();
        }

        let stop = Arc::clone(&self.stop);
        loop {
            let next = tokio::select! {
                next = body.next() => next,
                _ = stop.notified() => break,
            };
            match next {
                Some(Ok(chunk)) => {
                    if !self.push(chunk) {
                        break;
                    }
                }
                Some(Err(err)) => {
                    self.fail(InterceptError::Transport(err));
                    break;
                }
                None => {
                    self.finish();
                    break;
                }
            }
        }
        self.into_outcome()
    }

    fn into_outcome(mut self) -> RelayOutcome {
        self.check_terminated();
        let mut outcome = std::mem::take(&mut self.outcome);
        outcome.body = self.collected.take().map(BytesMut::freeze);
        debug!(
            context = self.context.id(),
            bytes = outcome.bytes_relayed,
            outcome = outcome.label(),
            "Relay finished"
        );
        outcome
    }
}
