//! Request predicates used to select a handler.
//!
//! # Module Structure
//!
//! - `builtin` - The [`Predicate`] enum: scheme, host, host+path, host+path
//!   prefix, absolute URL, relative path, URL regex and custom matchers
//! - `custom` - The [`RequestMatcher`] capability and closure adapters
//! - `compile` - Compilation of configured match blocks into predicates

mod builtin;
mod compile;
mod custom;

pub use builtin::Predicate;
pub use custom::{FnMatcher, RequestMatcher, TryFnMatcher};

/// Errors from building or evaluating predicates.
#[derive(Debug, thiserror::Error)]
pub enum PredicateError {
    #[error("Invalid URL pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Invalid match block: {0}")]
    InvalidMatch(String),
    #[error("Predicate evaluation failed: {0}")]
    Evaluation(String),
}
