//! HTTP front end for the interception engine.
//!
//! Every request received on the listener is offered to the
//! [`InterceptionEngine`]. Intercepted requests are answered from the
//! delivery; the rest get a 404 or are forwarded to their origin, depending
//! on [`FallbackMode`].
//!
//! # Module Structure
//!
//! - `builder` - Plain-text responses produced by the server itself
//! - `delivery` - Mapping of deliveries to responses, cancel-on-disconnect
//! - `metrics` - Prometheus scrape endpoint

mod builder;
mod delivery;
mod metrics;

pub use builder::{HookwireBody, SimpleResponseBuilder};
pub use metrics::serve_metrics;

use crate::config::{ConnectionPoolConfig, FallbackMode};
use crate::context::{ResponseContext, ResponseHandle};
use crate::engine::{DispatchSource, Disposition, InterceptionEngine};
use crate::headers::{VALUE_HANDLER, VALUE_PASSTHROUGH, VALUE_UPSTREAM};
use crate::metrics::record_request;
use crate::mime::MimeResolver;
use crate::pipe::PipeRelay;
use crate::request::InterceptedRequest;
use crate::upstream::{ReqwestUpstream, TransportError, UpstreamTransport};
use delivery::{into_response, CancelOnDrop};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Serves intercepted responses over HTTP/1.
pub struct InterceptServer {
    engine: Arc<InterceptionEngine>,
    passthrough: Option<Arc<ReqwestUpstream>>,
    mime: Arc<MimeResolver>,
    shutdown_tx: broadcast::Sender<()>,
}

impl InterceptServer {
    /// Server that answers unclaimed requests with 404.
    pub fn new(engine: Arc<InterceptionEngine>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mime = Arc::new(engine.mime().clone());
        Self {
            engine,
            passthrough: None,
            mime,
            shutdown_tx,
        }
    }

    /// Choose how unclaimed requests are answered.
    pub fn with_fallback(
        mut self,
        mode: FallbackMode,
        pool: &ConnectionPoolConfig,
    ) -> Result<Self, TransportError> {
        self.passthrough = match mode {
            FallbackMode::NotFound => None,
            FallbackMode::Passthrough => Some(Arc::new(ReqwestUpstream::direct(pool)?)),
        };
        Ok(self)
    }

    pub fn engine(&self) -> &Arc<InterceptionEngine> {
        &self.engine
    }

    /// Sender that stops the accept loop when signalled.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Accept connections on `listener` until shut down.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), anyhow::Error> {
        let local_addr = listener.local_addr()?;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        info!(
            "Intercepting on http://{} ({} handlers, {} upstreams)",
            local_addr,
            self.engine.registry().len(),
            self.engine.upstreams().len()
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, remote_addr)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let server = Arc::clone(&server);
                                    async move { server.handle_request(req).await }
                                });
                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!("Connection error from {}: {}", remote_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error on {}: {}", local_addr, e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Server on {} shutting down", local_addr);
                    break;
                }
            }
        }
        Ok(())
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<HookwireBody>, Infallible> {
        let method = req.method().clone();
        let response = self.respond(req).await;
        record_request(method.as_str(), response.status().as_u16());
        Ok(response)
    }

    async fn respond(&self, req: Request<Incoming>) -> Response<HookwireBody> {
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!("Failed to read request body: {}", e);
                return SimpleResponseBuilder::new(StatusCode::BAD_REQUEST)
                    .body("Failed to read request body")
                    .build();
            }
        };

        let request =
            match InterceptedRequest::from_parts(&parts, (!body.is_empty()).then_some(body), "http")
            {
                Ok(request) => request,
                Err(e) => {
                    debug!("Rejecting request: {}", e);
                    return SimpleResponseBuilder::new(StatusCode::BAD_REQUEST)
                        .body(e.to_string())
                        .build();
                }
            };

        let fallback = self.passthrough.as_ref().map(|_| request.clone());
        let (handle, source) = match self.engine.intercept(request) {
            Disposition::HandledBy { handle, source } => (handle, source_value(&source)),
            Disposition::NotIntercepted => match fallback {
                Some(request) => (self.passthrough(request), &VALUE_PASSTHROUGH),
                None => {
                    return SimpleResponseBuilder::new(StatusCode::NOT_FOUND)
                        .body("Not Found")
                        .build()
                }
            },
        };

        let guard = CancelOnDrop::new(handle.canceller());
        into_response(handle.await, source, guard)
    }

    fn passthrough(&self, request: InterceptedRequest) -> ResponseHandle {
        let (context, handle) = ResponseContext::new(Arc::new(request), Arc::clone(&self.mime));
        if let Some(transport) = &self.passthrough {
            let transport = Arc::clone(transport);
            debug!(
                context = context.id(),
                "Passing {} through via {}",
                context.request().absolute_url(),
                transport.describe()
            );
            tokio::spawn(async move {
                PipeRelay::new(context).run(transport.as_ref()).await;
            });
        }
        handle
    }
}

fn source_value(source: &DispatchSource) -> &'static HeaderValue {
    match source {
        DispatchSource::Handler(_) => &VALUE_HANDLER,
        DispatchSource::Upstream(_) => &VALUE_UPSTREAM,
    }
}

/// Serve `server` on `addr`, plus the metrics endpoint on `metrics_addr`.
pub async fn run(
    server: Arc<InterceptServer>,
    addr: &str,
    metrics_addr: Option<&str>,
) -> Result<(), anyhow::Error> {
    if let Some(metrics_addr) = metrics_addr {
        let listener = TcpListener::bind(metrics_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind metrics on {}: {}", metrics_addr, e))?;
        tokio::spawn(serve_metrics(listener, server.shutdown_handle().subscribe()));
    }
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    server.serve(listener).await
}
