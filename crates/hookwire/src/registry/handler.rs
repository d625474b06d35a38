//! The handler capability.

use crate::context::ResponseContext;
use crate::request::InterceptedRequest;
use std::sync::Arc;

/// Produces (or defers) a response for a matched request.
///
/// `handle` is called once per matched request and should return quickly;
/// long-running work belongs on a spawned task that keeps a clone of the
/// context. Dropping every clone without a terminal call fails the request.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: Arc<InterceptedRequest>, context: ResponseContext);
}

impl<F> RequestHandler for F
where
    F: Fn(Arc<InterceptedRequest>, ResponseContext) + Send + Sync,
{
    fn handle(&self, request: Arc<InterceptedRequest>, context: ResponseContext) {
        self(request, context)
    }
}
