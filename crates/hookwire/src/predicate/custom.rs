//! Caller-supplied predicates.
//!
//! Built-in predicates and closures share one capability interface,
//! [`RequestMatcher`], so the registry can hold either in the same slot.

use super::PredicateError;
use crate::request::InterceptedRequest;
use std::fmt;

/// A boolean test over request attributes.
pub trait RequestMatcher: Send + Sync {
    /// Evaluate the predicate. An `Err` is treated as "no match" by the registry.
    fn evaluate(&self, request: &InterceptedRequest) -> Result<bool, PredicateError>;

    /// Short description used in logs.
    fn describe(&self) -> String {
        "custom".to_string()
    }
}

/// Wraps an infallible closure.
pub struct FnMatcher<F> {
    f: F,
}

impl<F> FnMatcher<F>
where
    F: Fn(&InterceptedRequest) -> bool + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> RequestMatcher for FnMatcher<F>
where
    F: Fn(&InterceptedRequest) -> bool + Send + Sync,
{
    fn evaluate(&self, request: &InterceptedRequest) -> Result<bool, PredicateError> {
        Ok((self.f)(request))
    }
}

impl<F> fmt::Debug for FnMatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnMatcher")
    }
}

/// Wraps a closure that may fail.
pub struct TryFnMatcher<F> {
    f: F,
}

impl<F, E> TryFnMatcher<F>
where
    F: Fn(&InterceptedRequest) -> Result<bool, E> + Send + Sync,
    E: fmt::Display,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, E> RequestMatcher for TryFnMatcher<F>
where
    F: Fn(&InterceptedRequest) -> Result<bool, E> + Send + Sync,
    E: fmt::Display,
{
    fn evaluate(&self, request: &InterceptedRequest) -> Result<bool, PredicateError> {
        (self.f)(request).map_err(|e| PredicateError::Evaluation(e.to_string()))
    }
}

impl<F> fmt::Debug for TryFnMatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TryFnMatcher")
    }
}
