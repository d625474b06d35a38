//! Producer side of a response context.
//!
//! Every phase change happens while holding the sink lock, so a sender is
//! always taken by the same actor that won the transition. Deliveries to the
//! consumer and the stop-loading callback run after the lock is released.

use super::delivery::{
    BodyStream, Canceller, Delivery, ResponseBody, ResponseHandle, ResponseHead, StreamEvent,
};
use super::state::{CachePolicy, Phase, PhaseCell};
use super::ResponseError;
use crate::error::InterceptError;
use crate::metrics;
use crate::mime::MimeResolver;
use crate::request::InterceptedRequest;
use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, StatusCode};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

type StopLoadingHandler = Box<dyn FnOnce() + Send + 'static>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

struct Meta {
    status: StatusCode,
    headers: HeaderMap,
    cache_policy: CachePolicy,
}

struct Sinks {
    head: Option<oneshot::Sender<Delivery>>,
    body: Option<mpsc::UnboundedSender<StreamEvent>>,
}

/// How a terminal response treats `Content-Type`.
pub(super) enum ContentType {
    Keep,
    IfAbsent(HeaderValue),
    Force(HeaderValue),
}

pub(crate) struct Shared {
    id: u64,
    request: Arc<InterceptedRequest>,
    mime: Arc<MimeResolver>,
    phase: PhaseCell,
    meta: Mutex<Meta>,
    sinks: Mutex<Sinks>,
    stop_loading: Mutex<Option<StopLoadingHandler>>,
}

impl Shared {
    pub(crate) fn cancel(&self) -> bool {
        let (head_tx, body_tx) = {
            let mut sinks = self.sinks.lock();
            if self
                .phase
                .transition(&[Phase::Open, Phase::Delivering], Phase::Cancelled)
                .is_none()
            {
                return false;
            }
            (sinks.head.take(), sinks.body.take())
        };

        if let Some(tx) = head_tx {
            let _ = tx.send(Delivery::Cancelled);
        }
        if let Some(tx) = body_tx {
            let _ = tx.send(StreamEvent::Cancelled);
        }
        metrics::record_delivery("cancelled");
        debug!(
            context = self.id,
            url = %self.request.absolute_url(),
            "Response context cancelled"
        );

        let handler = self.stop_loading.lock().take();
        if let Some(handler) = handler {
            run_stop_loading(self.id, handler);
        }
        true
    }

    fn complete(&self, status: Option<StatusCode>, content_type: ContentType, body: Bytes) {
        let mut sinks = self.sinks.lock();
        let Some(previous) = self
            .phase
            .transition(&[Phase::Open, Phase::Delivering], Phase::Completed)
        else {
            drop(sinks);
            debug!(
                context = self.id,
                phase = %self.phase.load(),
                "Ignoring response on finished context"
            );
            return;
        };

        if previous == Phase::Open {
            let tx = sinks.head.take();
            drop(sinks);
            let head = {
                let mut meta = self.meta.lock();
                if let Some(status) = status {
                    meta.status = status;
                }
                match content_type {
                    ContentType::Keep => {}
                    ContentType::IfAbsent(value) => {
                        if !meta.headers.contains_key(CONTENT_TYPE) {
                            meta.headers.insert(CONTENT_TYPE, value);
                        }
                    }
                    ContentType::Force(value) => {
                        meta.headers.insert(CONTENT_TYPE, value);
                    }
                }
                snapshot(&meta)
            };
            if let Some(tx) = tx {
                let _ = tx.send(Delivery::Response {
                    head,
                    body: ResponseBody::Full(body),
                });
            }
        } else {
            // Head already committed by pipe_response; the body is appended
            let tx = sinks.body.take();
            drop(sinks);
            if let Some(tx) = tx {
                if !body.is_empty() {
                    metrics::record_piped_bytes(body.len());
                    let _ = tx.send(StreamEvent::Data(body));
                }
                let _ = tx.send(StreamEvent::End);
            }
        }
        metrics::record_delivery("completed");
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        metrics::ACTIVE_CONTEXTS.dec();
        if !self.phase.load().is_terminal() {
            metrics::record_delivery("abandoned");
            warn!(
                context = self.id,
                url = %self.request.absolute_url(),
                "Response context dropped before a terminal response"
            );
        }
    }
}

fn snapshot(meta: &Meta) -> ResponseHead {
    ResponseHead {
        status: meta.status,
        headers: meta.headers.clone(),
        cache_policy: meta.cache_policy,
    }
}

fn run_stop_loading(id: u64, handler: StopLoadingHandler) {
    if catch_unwind(AssertUnwindSafe(handler)).is_err() {
        error!(context = id, "Stop-loading handler panicked");
    }
}

pub(super) fn parse_status(status: u16) -> Result<StatusCode, ResponseError> {
    StatusCode::from_u16(status).map_err(|_| ResponseError::InvalidStatus(status))
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), ResponseError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ResponseError::InvalidHeaderName(name.to_string()))?;
    let value = HeaderValue::from_str(value)
        .map_err(|_| ResponseError::InvalidHeaderValue(name.to_string()))?;
    Ok((name, value))
}

pub(super) fn parse_content_type(mime: &str) -> Result<HeaderValue, ResponseError> {
    HeaderValue::from_str(mime).map_err(|_| ResponseError::InvalidContentType(mime.to_string()))
}

/// Per-request response builder handed to a handler.
///
/// Cheap to clone; every clone drives the same state machine. Exactly one
/// terminal outcome reaches the consumer no matter how many responder or
/// pipe calls are made, and calls after that outcome have no effect.
#[derive(Clone)]
pub struct ResponseContext {
    shared: Arc<Shared>,
}

impl ResponseContext {
    /// Create a context for `request` and the consumer handle that observes it.
    pub fn new(
        request: Arc<InterceptedRequest>,
        mime: Arc<MimeResolver>,
    ) -> (ResponseContext, ResponseHandle) {
        let (head_tx, head_rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            request,
            mime,
            phase: PhaseCell::new(),
            meta: Mutex::new(Meta {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                cache_policy: CachePolicy::default(),
            }),
            sinks: Mutex::new(Sinks {
                head: Some(head_tx),
                body: None,
            }),
            stop_loading: Mutex::new(None),
        });
        metrics::ACTIVE_CONTEXTS.inc();

        let handle = ResponseHandle::new(head_rx, Canceller::new(Arc::downgrade(&shared)));
        (ResponseContext { shared }, handle)
    }

    /// Identifier used in logs.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn request(&self) -> &Arc<InterceptedRequest> {
        &self.shared.request
    }

    pub fn phase(&self) -> Phase {
        self.shared.phase.load()
    }

    pub fn is_cancelled(&self) -> bool {
        self.phase() == Phase::Cancelled
    }

    pub fn is_terminal(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn status(&self) -> StatusCode {
        self.shared.meta.lock().status
    }

    pub fn headers(&self) -> HeaderMap {
        self.shared.meta.lock().headers.clone()
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.shared.meta.lock().cache_policy
    }

    pub(crate) fn canceller(&self) -> Canceller {
        Canceller::new(Arc::downgrade(&self.shared))
    }

    pub(crate) fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    // ===== Metadata =====

    /// Set the status used by the next terminal response. Ignored once the
    /// head has been committed.
    pub fn set_status(&self, status: u16) -> Result<(), ResponseError> {
        let status = parse_status(status)?;
        self.with_open_meta(|meta| meta.status = status);
        Ok(())
    }

    /// Set a header, replacing earlier values for the same name.
    pub fn set_header(&self, name: &str, value: &str) -> Result<(), ResponseError> {
        let (name, value) = parse_header(name, value)?;
        self.with_open_meta(|meta| {
            meta.headers.insert(name, value);
        });
        Ok(())
    }

    /// Set several headers. Nothing is applied if any entry is invalid.
    pub fn set_headers<I, K, V>(&self, headers: I) -> Result<(), ResponseError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let parsed = headers
            .into_iter()
            .map(|(name, value)| parse_header(name.as_ref(), value.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        self.with_open_meta(|meta| {
            for (name, value) in parsed {
                meta.headers.insert(name, value);
            }
        });
        Ok(())
    }

    pub fn set_cache_policy(&self, policy: CachePolicy) {
        self.with_open_meta(|meta| meta.cache_policy = policy);
    }

    fn with_open_meta(&self, f: impl FnOnce(&mut Meta)) {
        let mut meta = self.shared.meta.lock();
        if self.shared.phase.load() == Phase::Open {
            f(&mut meta);
        } else {
            debug!(
                context = self.shared.id,
                "Ignoring metadata change on committed context"
            );
        }
    }

    // ===== Low-level responders =====

    /// Respond with a body and an optional MIME type, using the current status.
    ///
    /// Without a MIME type, one is resolved from the request path extension.
    /// With neither body nor MIME type, no `Content-Type` is set.
    pub fn respond_with_data(
        &self,
        data: Option<Bytes>,
        mime: Option<&str>,
    ) -> Result<(), ResponseError> {
        self.respond(data, mime, None)
    }

    /// Respond with a status code and an optional plain-text body.
    pub fn respond_with_status_code(
        &self,
        status: u16,
        text: Option<&str>,
    ) -> Result<(), ResponseError> {
        let status = parse_status(status)?;
        let (body, content_type) = match text {
            Some(text) => (
                Bytes::copy_from_slice(text.as_bytes()),
                ContentType::IfAbsent(HeaderValue::from_static("text/plain")),
            ),
            None => (Bytes::new(), ContentType::Keep),
        };
        self.shared.complete(Some(status), content_type, body);
        Ok(())
    }

    /// Respond with a body, an optional MIME type and an explicit status.
    pub fn respond_with_data_status(
        &self,
        data: Option<Bytes>,
        mime: Option<&str>,
        status: u16,
    ) -> Result<(), ResponseError> {
        self.respond(data, mime, Some(status))
    }

    fn respond(
        &self,
        data: Option<Bytes>,
        mime: Option<&str>,
        status: Option<u16>,
    ) -> Result<(), ResponseError> {
        let status = status.map(parse_status).transpose()?;
        let body = data.unwrap_or_default();
        let content_type = match mime {
            Some(mime) => ContentType::Force(parse_content_type(mime)?),
            None if body.is_empty() => ContentType::Keep,
            None => ContentType::IfAbsent(self.guessed_content_type()),
        };
        self.shared.complete(status, content_type, body);
        Ok(())
    }

    pub(super) fn respond_with_content(
        &self,
        body: Bytes,
        content_type: ContentType,
    ) -> Result<(), ResponseError> {
        self.shared.complete(None, content_type, body);
        Ok(())
    }

    fn guessed_content_type(&self) -> HeaderValue {
        let mime = self.shared.mime.guess(self.shared.request.path());
        HeaderValue::from_str(&mime)
            .unwrap_or_else(|_| HeaderValue::from_static(crate::mime::DEFAULT_MIME_TYPE))
    }

    // ===== Pipe API =====

    /// Commit an upstream status and headers and start a streamed body.
    ///
    /// Headers set on this context beforehand replace upstream headers of
    /// the same name.
    pub fn pipe_response(&self, status: u16, headers: &HeaderMap) -> Result<(), ResponseError> {
        let status = parse_status(status)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let head_tx = {
            let mut sinks = self.shared.sinks.lock();
            if self
                .shared
                .phase
                .transition(&[Phase::Open], Phase::Delivering)
                .is_none()
            {
                debug!(
                    context = self.shared.id,
                    phase = %self.shared.phase.load(),
                    "Ignoring pipe_response outside the open phase"
                );
                return Ok(());
            }
            sinks.body = Some(tx);
            sinks.head.take()
        };

        let head = {
            let mut meta = self.shared.meta.lock();
            let mut merged = headers.clone();
            for name in meta.headers.keys() {
                merged.remove(name);
            }
            for (name, value) in meta.headers.iter() {
                merged.append(name.clone(), value.clone());
            }
            meta.status = status;
            meta.headers = merged;
            snapshot(&meta)
        };

        if let Some(tx) = head_tx {
            let _ = tx.send(Delivery::Response {
                head,
                body: ResponseBody::Streaming(BodyStream::new(rx)),
            });
        }
        Ok(())
    }

    /// Append a body chunk. Only effective while delivering.
    pub fn pipe_data(&self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        let sinks = self.shared.sinks.lock();
        match self.shared.phase.load() {
            Phase::Delivering => {
                if let Some(tx) = &sinks.body {
                    let len = data.len();
                    if tx.send(StreamEvent::Data(data)).is_ok() {
                        metrics::record_piped_bytes(len);
                    }
                }
            }
            Phase::Open => warn!(
                context = self.shared.id,
                "pipe_data called before pipe_response; chunk dropped"
            ),
            _ => debug!(context = self.shared.id, "Ignoring pipe_data on finished context"),
        }
    }

    /// Finish a streamed body.
    pub fn pipe_end(&self) {
        let tx = {
            let mut sinks = self.shared.sinks.lock();
            if self
                .shared
                .phase
                .transition(&[Phase::Delivering], Phase::Completed)
                .is_none()
            {
                drop(sinks);
                if self.phase() == Phase::Open {
                    warn!(
                        context = self.shared.id,
                        "pipe_end called before pipe_response; ignored"
                    );
                } else {
                    debug!(context = self.shared.id, "Ignoring pipe_end on finished context");
                }
                return;
            }
            sinks.body.take()
        };
        if let Some(tx) = tx {
            let _ = tx.send(StreamEvent::End);
        }
        metrics::record_delivery("completed");
    }

    /// Terminate with an error. Chunks already piped stay delivered.
    pub fn pipe_error(&self, err: InterceptError) {
        let mut sinks = self.shared.sinks.lock();
        match self
            .shared
            .phase
            .transition(&[Phase::Open, Phase::Delivering], Phase::Completed)
        {
            Some(Phase::Open) => {
                let tx = sinks.head.take();
                drop(sinks);
                warn!(context = self.shared.id, error = %err, "Request failed");
                if let Some(tx) = tx {
                    let _ = tx.send(Delivery::Failed(err));
                }
            }
            Some(_) => {
                let tx = sinks.body.take();
                drop(sinks);
                warn!(context = self.shared.id, error = %err, "Streamed response failed");
                if let Some(tx) = tx {
                    let _ = tx.send(StreamEvent::Error(err));
                }
            }
            None => {
                drop(sinks);
                debug!(
                    context = self.shared.id,
                    error = %err,
                    "Ignoring pipe_error on finished context"
                );
                return;
            }
        }
        metrics::record_delivery("failed");
    }

    // ===== Cancellation =====

    /// Register the callback run when the request is cancelled.
    ///
    /// The latest registration replaces earlier ones. If the context is
    /// already cancelled, `handler` runs immediately.
    pub fn handle_stop_loading_request<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.install_stop_loading(Box::new(handler), false);
    }

    /// Like [`handle_stop_loading_request`](Self::handle_stop_loading_request),
    /// but keeps the current callback and runs it after `handler`.
    pub(crate) fn chain_stop_loading_request<F>(&self, handler: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.install_stop_loading(Box::new(handler), true);
    }

    fn install_stop_loading(&self, handler: StopLoadingHandler, chain: bool) {
        let mut slot = self.shared.stop_loading.lock();
        let previous = slot.take().filter(|_| chain);
        let handler: StopLoadingHandler = match previous {
            Some(previous) => Box::new(move || {
                handler();
                previous();
            }),
            None => handler,
        };
        if self.shared.phase.load() == Phase::Cancelled {
            drop(slot);
            run_stop_loading(self.shared.id, handler);
            return;
        }
        *slot = Some(handler);
    }
}

impl fmt::Debug for ResponseContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseContext")
            .field("id", &self.shared.id)
            .field("url", &self.shared.request.absolute_url())
            .field("phase", &self.shared.phase.load())
            .finish()
    }
}
