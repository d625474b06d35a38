//! Ordered registry of `(predicate, handler)` pairs.
//!
//! Reads take a snapshot of the entry list and evaluate predicates without
//! holding any lock; writers replace the snapshot. Registration order is
//! match precedence: the first entry whose predicate matches wins.

mod handler;


pub use handler::RequestHandler;

use crate::metrics;
use crate::predicate::{Predicate, PredicateError};
use crate::request::InterceptedRequest;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Identifier returned by [`HandlerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler-{}", self.0)
    }
}

/// A registered handler and the predicate that selects it.
pub struct HandlerEntry {
    id: HandlerId,
    name: Option<String>,
    predicate: Predicate,
    handler: Arc<dyn RequestHandler>,
}

impl HandlerEntry {
    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn handler(&self) -> &Arc<dyn RequestHandler> {
        &self.handler
    }

    /// Name if set, otherwise the id.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}

impl fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("predicate", &self.predicate)
            .finish()
    }
}

type Snapshot = Arc<Vec<Arc<HandlerEntry>>>;

static GLOBAL: Lazy<HandlerRegistry> = Lazy::new(HandlerRegistry::new);

#[derive(Default)]
pub struct HandlerRegistry {
    entries: RwLock<Snapshot>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> &'static HandlerRegistry {
        &GLOBAL
    }

    /// Append a handler. Later registrations have lower precedence.
    pub fn register<H>(&self, predicate: Predicate, handler: H) -> HandlerId
    where
        H: RequestHandler + 'static,
    {
        self.insert(None, predicate, Arc::new(handler))
    }

    /// Append a handler with a name used in logs.
    pub fn register_named<H>(
        &self,
        name: impl Into<String>,
        predicate: Predicate,
        handler: H,
    ) -> HandlerId
    where
        H: RequestHandler + 'static,
    {
        self.insert(Some(name.into()), predicate, Arc::new(handler))
    }

    /// Append a shared handler.
    pub fn register_shared(
        &self,
        name: Option<String>,
        predicate: Predicate,
        handler: Arc<dyn RequestHandler>,
    ) -> HandlerId {
        self.insert(name, predicate, handler)
    }

    fn insert(
        &self,
        name: Option<String>,
        predicate: Predicate,
        handler: Arc<dyn RequestHandler>,
    ) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(
            "Registering {} for {}",
            name.as_deref().unwrap_or("handler"),
            predicate
        );
        let entry = Arc::new(HandlerEntry {
            id,
            name,
            predicate,
            handler,
        });

        let mut entries = self.entries.write();
        let mut next = Vec::with_capacity(entries.len() + 1);
        next.extend(entries.iter().cloned());
        next.push(entry);
        *entries = Arc::new(next);
        id
    }

    // ===== Convenience registration =====

    pub fn handle_scheme<H>(&self, scheme: &str, handler: H) -> HandlerId
    where
        H: RequestHandler + 'static,
    {
        self.register(Predicate::scheme(scheme), handler)
    }

    pub fn handle_host<H>(&self, host: &str, handler: H) -> HandlerId
    where
        H: RequestHandler + 'static,
    {
        self.register(Predicate::host(host), handler)
    }

    pub fn handle_scheme_host<H>(&self, scheme: &str, host: &str, handler: H) -> HandlerId
    where
        H: RequestHandler + 'static,
    {
        self.register(Predicate::scheme_host(scheme, host), handler)
    }

    pub fn handle_host_path<H>(&self, host: &str, path: &str, handler: H) -> HandlerId
    where
        H: RequestHandler + 'static,
    {
        self.register(Predicate::host_path(host, path), handler)
    }

    /// `prefix` is a raw string prefix of the path, not segment-aware.
    pub fn handle_host_path_prefix<H>(&self, host: &str, prefix: &str, handler: H) -> HandlerId
    where
        H: RequestHandler + 'static,
    {
        self.register(Predicate::host_path_prefix(host, prefix), handler)
    }

    pub fn handle_absolute_string<H>(&self, url: &str, handler: H) -> HandlerId
    where
        H: RequestHandler + 'static,
    {
        self.register(Predicate::absolute_string(url), handler)
    }

    pub fn handle_relative_path<H>(&self, path: &str, handler: H) -> HandlerId
    where
        H: RequestHandler + 'static,
    {
        self.register(Predicate::relative_path(path), handler)
    }

    pub fn handle_http_or_https<H>(&self, handler: H) -> HandlerId
    where
        H: RequestHandler + 'static,
    {
        self.register(Predicate::http_or_https(), handler)
    }

    pub fn handle_url_regex<H>(
        &self,
        pattern: &str,
        handler: H,
    ) -> Result<HandlerId, PredicateError>
    where
        H: RequestHandler + 'static,
    {
        Ok(self.register(Predicate::url_regex(pattern)?, handler))
    }

    pub fn handle_predicate<F, H>(&self, predicate: F, handler: H) -> HandlerId
    where
        F: Fn(&InterceptedRequest) -> bool + Send + Sync + 'static,
        H: RequestHandler + 'static,
    {
        self.register(Predicate::custom(predicate), handler)
    }

    // ===== Lookup =====

    /// First entry whose predicate matches.
    ///
    /// A predicate that fails to evaluate is logged and treated as no match.
    pub fn find(&self, request: &InterceptedRequest) -> Option<Arc<HandlerEntry>> {
        let snapshot = self.snapshot();
        for entry in snapshot.iter() {
            match entry.predicate.evaluate(request) {
                Ok(true) => return Some(Arc::clone(entry)),
                Ok(false) => {}
                Err(e) => {
                    metrics::record_predicate_error("handler");
                    warn!(
                        "Predicate for {} failed on {}: {}",
                        entry.label(),
                        request.absolute_url(),
                        e
                    );
                }
            }
        }
        None
    }

    /// Current entries in precedence order.
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.entries.read())
    }

    /// Remove every entry. Requests already dispatched are unaffected.
    pub fn clear(&self) {
        *self.entries.write() = Arc::new(Vec::new());
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("entries", &self.len())
            .finish()
    }
}
