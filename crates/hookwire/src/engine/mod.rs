//! Interception engine: routes each request to a handler, an upstream, or
//! back to the consumer.
//!
//! # Precedence
//!
//! 1. Registered handlers, in registration order
//! 2. Configured upstreams, in configuration order
//! 3. `NotIntercepted`
//!
//! Handlers are invoked synchronously on the calling thread and must not
//! block; the consumer observes the outcome through the returned
//! [`ResponseHandle`]. Upstream relays run on a tokio runtime.

mod setup;

#[cfg(test)]
mod tests;

use crate::config::ConnectionPoolConfig;
use crate::context::{ResponseContext, ResponseHandle};
use crate::error::{panic_message, InterceptError};
use crate::metrics;
use crate::mime::MimeResolver;
use crate::pipe::{PipeRelay, RelayOutcome};
use crate::predicate::Predicate;
use crate::registry::{HandlerEntry, HandlerId, HandlerRegistry};
use crate::request::InterceptedRequest;
use crate::upstream::{ReqwestUpstream, TransportError, UpstreamTarget, UpstreamTransport};
use parking_lot::RwLock;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

/// Called once per forwarded request with the relay outcome.
pub type OnComplete = Arc<dyn Fn(&InterceptedRequest, &RelayOutcome) + Send + Sync>;

/// Observes every forwarded request, regardless of which upstream served it.
pub trait UpstreamObserver: Send + Sync {
    fn upstream_completed(&self, request: &InterceptedRequest, outcome: &RelayOutcome);
}

/// Who took responsibility for an intercepted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchSource {
    Handler(HandlerId),
    /// Upstream transport description
    Upstream(String),
}

/// Result of offering a request to the engine.
#[derive(Debug)]
pub enum Disposition {
    /// No handler or upstream claimed the request; load it normally.
    NotIntercepted,
    HandledBy {
        handle: ResponseHandle,
        source: DispatchSource,
    },
}

impl Disposition {
    pub fn is_intercepted(&self) -> bool {
        matches!(self, Disposition::HandledBy { .. })
    }

    pub fn into_handle(self) -> Option<ResponseHandle> {
        match self {
            Disposition::HandledBy { handle, .. } => Some(handle),
            Disposition::NotIntercepted => None,
        }
    }
}

/// A predicate-selected upstream transport.
pub struct UpstreamRoute {
    predicate: Predicate,
    transport: Arc<dyn UpstreamTransport>,
    on_complete: Option<OnComplete>,
}

impl UpstreamRoute {
    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn describe(&self) -> String {
        self.transport.describe()
    }
}

impl fmt::Debug for UpstreamRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamRoute")
            .field("predicate", &self.predicate)
            .field("transport", &self.transport.describe())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

pub struct InterceptionEngine {
    registry: Arc<HandlerRegistry>,
    upstreams: RwLock<Arc<Vec<Arc<UpstreamRoute>>>>,
    mime: Arc<MimeResolver>,
    pool: ConnectionPoolConfig,
    runtime: Option<Handle>,
    observer: RwLock<Option<Arc<dyn UpstreamObserver>>>,
    enabled: AtomicBool,
}

impl InterceptionEngine {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            upstreams: RwLock::new(Arc::new(Vec::new())),
            mime: Arc::new(MimeResolver::default()),
            pool: ConnectionPoolConfig::default(),
            runtime: Handle::try_current().ok(),
            observer: RwLock::new(None),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn with_mime(mut self, mime: MimeResolver) -> Self {
        self.mime = Arc::new(mime);
        self
    }

    /// Pool settings used by [`Self::configure_upstream`].
    pub fn with_connection_pool(mut self, pool: ConnectionPoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Runtime that runs upstream relays. Defaults to the runtime current at
    /// construction, if any.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn mime(&self) -> &MimeResolver {
        &self.mime
    }

    pub fn set_observer(&self, observer: Option<Arc<dyn UpstreamObserver>>) {
        *self.observer.write() = observer;
    }

    // ===== Enable / disable =====

    /// Resume intercepting requests.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    /// Stop intercepting; every request is `NotIntercepted` until re-enabled.
    /// Registrations are kept.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    // ===== Upstreams =====

    /// Forward requests matching `predicate` through `transport`.
    pub fn add_upstream(
        &self,
        predicate: Predicate,
        transport: Arc<dyn UpstreamTransport>,
        on_complete: Option<OnComplete>,
    ) {
        info!("Forwarding {} via {}", predicate, transport.describe());
        let route = Arc::new(UpstreamRoute {
            predicate,
            transport,
            on_complete,
        });
        let mut upstreams = self.upstreams.write();
        let mut next = Vec::with_capacity(upstreams.len() + 1);
        next.extend(upstreams.iter().cloned());
        next.push(route);
        *upstreams = Arc::new(next);
    }

    /// Forward requests matching `predicate` through the HTTP proxy at
    /// `target`.
    pub fn configure_upstream(
        &self,
        target: UpstreamTarget,
        predicate: Predicate,
        on_complete: Option<OnComplete>,
    ) -> Result<(), TransportError> {
        let transport = ReqwestUpstream::new(target, &self.pool)?;
        self.add_upstream(predicate, Arc::new(transport), on_complete);
        Ok(())
    }

    pub fn upstreams(&self) -> Arc<Vec<Arc<UpstreamRoute>>> {
        Arc::clone(&self.upstreams.read())
    }

    /// Remove every handler and upstream.
    pub fn clear(&self) {
        self.registry.clear();
        *self.upstreams.write() = Arc::new(Vec::new());
    }

    // ===== Interception =====

    /// Offer a request for interception.
    ///
    /// Returns as soon as the handler returns or the upstream relay is
    /// scheduled; it never waits for the response itself.
    pub fn intercept(&self, request: InterceptedRequest) -> Disposition {
        if !self.is_enabled() {
            metrics::record_interception("not_intercepted");
            return Disposition::NotIntercepted;
        }

        let request = Arc::new(request);
        if let Some(entry) = self.registry.find(&request) {
            metrics::record_interception("handler");
            return self.dispatch(entry, request);
        }
        if let Some(route) = self.find_upstream(&request) {
            metrics::record_interception("upstream");
            return self.forward(route, request);
        }

        metrics::record_interception("not_intercepted");
        debug!("Not intercepting {}", request.absolute_url());
        Disposition::NotIntercepted
    }

    /// Cancel an intercepted request. Returns `true` if this call cancelled it.
    pub fn cancel(&self, handle: &ResponseHandle) -> bool {
        handle.cancel()
    }

    fn find_upstream(&self, request: &InterceptedRequest) -> Option<Arc<UpstreamRoute>> {
        let upstreams = self.upstreams();
        for route in upstreams.iter() {
            match route.predicate.evaluate(request) {
                Ok(true) => return Some(Arc::clone(route)),
                Ok(false) => {}
                Err(e) => {
                    metrics::record_predicate_error("upstream");
                    warn!(
                        "Upstream predicate for {} failed on {}: {}",
                        route.describe(),
                        request.absolute_url(),
                        e
                    );
                }
            }
        }
        None
    }

    fn dispatch(&self, entry: Arc<HandlerEntry>, request: Arc<InterceptedRequest>) -> Disposition {
        let (context, handle) = ResponseContext::new(Arc::clone(&request), Arc::clone(&self.mime));
        debug!(
            context = context.id(),
            "Dispatching {} {} to {}",
            request.method(),
            request.absolute_url(),
            entry.label()
        );

        let guard = context.clone();
        let handler = Arc::clone(entry.handler());
        if let Err(panic) = catch_unwind(AssertUnwindSafe(move || handler.handle(request, context)))
        {
            let message = panic_message(panic.as_ref());
            metrics::record_handler_panic();
            error!("Handler {} panicked: {}", entry.label(), message);
            guard.pipe_error(InterceptError::HandlerPanicked(message));
        }

        Disposition::HandledBy {
            handle,
            source: DispatchSource::Handler(entry.id()),
        }
    }

    fn forward(&self, route: Arc<UpstreamRoute>, request: Arc<InterceptedRequest>) -> Disposition {
        let (context, handle) = ResponseContext::new(Arc::clone(&request), Arc::clone(&self.mime));
        let source = DispatchSource::Upstream(route.describe());

        let runtime = self
            .runtime
            .clone()
            .or_else(|| Handle::try_current().ok());
        let Some(runtime) = runtime else {
            error!("Cannot forward {}: no async runtime", request.absolute_url());
            context.pipe_error(InterceptError::NoRuntime);
            return Disposition::HandledBy { handle, source };
        };

        let observer = self.observer.read().clone();
        debug!(
            context = context.id(),
            "Forwarding {} {} via {}",
            request.method(),
            request.absolute_url(),
            route.describe()
        );
        runtime.spawn(async move {
            let started = Instant::now();
            let collect = route.on_complete.is_some() || observer.is_some();
            let outcome = PipeRelay::new(context)
                .collecting(collect)
                .run(route.transport.as_ref())
                .await;
            metrics::record_upstream_duration(
                outcome.label(),
                started.elapsed().as_secs_f64() * 1000.0,
            );

            if let Some(on_complete) = &route.on_complete {
                on_complete(&request, &outcome);
            }
            if let Some(observer) = observer {
                observer.upstream_completed(&request, &outcome);
            }
        });

        Disposition::HandledBy { handle, source }
    }
}

impl fmt::Debug for InterceptionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionEngine")
            .field("handlers", &self.registry.len())
            .field("upstreams", &self.upstreams.read().len())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
