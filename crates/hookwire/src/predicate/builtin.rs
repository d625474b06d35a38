//! Built-in request predicates.
//!
//! All comparisons are case-sensitive. Path prefixes are raw string
//! prefixes: `/bar` matches `/bar/baz` and also `/barely`.

use super::custom::{FnMatcher, RequestMatcher, TryFnMatcher};
use super::PredicateError;
use crate::error::panic_message;
use crate::request::InterceptedRequest;
use regex::Regex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A request predicate.
#[derive(Clone)]
pub enum Predicate {
    /// `scheme == s`
    Scheme(String),
    /// `host == h`
    Host(String),
    /// scheme and host both equal
    SchemeHost { scheme: String, host: String },
    /// host equal and path equal
    HostPath { host: String, path: String },
    /// host equal and path starts with prefix
    HostPathPrefix { host: String, prefix: String },
    /// absolute URL equal
    AbsoluteString(String),
    /// path equal, host ignored
    RelativePath(String),
    /// scheme is `http` or `https`
    HttpOrHttps,
    /// regex over the absolute URL
    UrlRegex(Arc<Regex>),
    /// caller-supplied matcher
    Custom(Arc<dyn RequestMatcher>),
}

impl Predicate {
    pub fn scheme(scheme: impl Into<String>) -> Self {
        Predicate::Scheme(scheme.into())
    }

    pub fn host(host: impl Into<String>) -> Self {
        Predicate::Host(host.into())
    }

    pub fn scheme_host(scheme: impl Into<String>, host: impl Into<String>) -> Self {
        Predicate::SchemeHost {
            scheme: scheme.into(),
            host: host.into(),
        }
    }

    pub fn host_path(host: impl Into<String>, path: impl Into<String>) -> Self {
        Predicate::HostPath {
            host: host.into(),
            path: path.into(),
        }
    }

    pub fn host_path_prefix(host: impl Into<String>, prefix: impl Into<String>) -> Self {
        Predicate::HostPathPrefix {
            host: host.into(),
            prefix: prefix.into(),
        }
    }

    pub fn absolute_string(url: impl Into<String>) -> Self {
        Predicate::AbsoluteString(url.into())
    }

    pub fn relative_path(path: impl Into<String>) -> Self {
        Predicate::RelativePath(path.into())
    }

    pub fn http_or_https() -> Self {
        Predicate::HttpOrHttps
    }

    /// Compile a regex that is matched against the absolute URL.
    pub fn url_regex(pattern: &str) -> Result<Self, PredicateError> {
        let regex = Regex::new(pattern).map_err(|source| PredicateError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        Ok(Predicate::UrlRegex(Arc::new(regex)))
    }

    /// Wrap an infallible closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&InterceptedRequest) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(FnMatcher::new(f)))
    }

    /// Wrap a fallible closure. Failures count as "no match".
    pub fn try_custom<F, E>(f: F) -> Self
    where
        F: Fn(&InterceptedRequest) -> Result<bool, E> + Send + Sync + 'static,
        E: fmt::Display + 'static,
    {
        Predicate::Custom(Arc::new(TryFnMatcher::new(f)))
    }

    /// Wrap any [`RequestMatcher`] implementation.
    pub fn matcher(matcher: impl RequestMatcher + 'static) -> Self {
        Predicate::Custom(Arc::new(matcher))
    }

    /// Evaluate the predicate against a request.
    ///
    /// A custom matcher that panics is reported as [`PredicateError::Evaluation`].
    pub fn evaluate(&self, req: &InterceptedRequest) -> Result<bool, PredicateError> {
        let matched = match self {
            Predicate::Scheme(scheme) => req.scheme() == scheme,
            Predicate::Host(host) => req.host() == host,
            Predicate::SchemeHost { scheme, host } => req.scheme() == scheme && req.host() == host,
            Predicate::HostPath { host, path } => req.host() == host && req.path() == path,
            Predicate::HostPathPrefix { host, prefix } => {
                req.host() == host && req.path().starts_with(prefix.as_str())
            }
            Predicate::AbsoluteString(url) => req.absolute_url() == url,
            Predicate::RelativePath(path) => req.path() == path,
            Predicate::HttpOrHttps => matches!(req.scheme(), "http" | "https"),
            Predicate::UrlRegex(regex) => regex.is_match(req.absolute_url()),
            Predicate::Custom(matcher) => {
                return catch_unwind(AssertUnwindSafe(|| matcher.evaluate(req))).unwrap_or_else(
                    |panic| {
                        Err(PredicateError::Evaluation(format!(
                            "matcher panicked: {}",
                            panic_message(panic.as_ref())
                        )))
                    },
                );
            }
        };
        Ok(matched)
    }

    /// Convenience for tests and callers that treat failures as "no match".
    pub fn matches(&self, req: &InterceptedRequest) -> bool {
        self.evaluate(req).unwrap_or(false)
    }
}

impl RequestMatcher for Predicate {
    fn evaluate(&self, request: &InterceptedRequest) -> Result<bool, PredicateError> {
        Predicate::evaluate(self, request)
    }

    fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Scheme(scheme) => write!(f, "scheme={scheme}"),
            Predicate::Host(host) => write!(f, "host={host}"),
            Predicate::SchemeHost { scheme, host } => write!(f, "scheme={scheme} host={host}"),
            Predicate::HostPath { host, path } => write!(f, "host={host} path={path}"),
            Predicate::HostPathPrefix { host, prefix } => {
                write!(f, "host={host} path_prefix={prefix}")
            }
            Predicate::AbsoluteString(url) => write!(f, "absolute_string={url}"),
            Predicate::RelativePath(path) => write!(f, "relative_path={path}"),
            Predicate::HttpOrHttps => f.write_str("scheme=http|https"),
            Predicate::UrlRegex(regex) => write!(f, "url_regex={}", regex.as_str()),
            Predicate::Custom(matcher) => f.write_str(&matcher.describe()),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({self})")
    }
}
