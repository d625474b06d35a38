//! Read-only request view handed to predicates and handlers.

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue, HOST};
use hyper::http::request::Parts;
use hyper::{HeaderMap, Method, Uri};
use std::str::FromStr;

/// Errors raised while building an [`InterceptedRequest`].
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Invalid request URL '{0}': {1}")]
    InvalidUrl(String, String),
    #[error("Request URL '{0}' has no scheme")]
    MissingScheme(String),
    #[error("Request URL '{0}' has no host")]
    MissingHost(String),
}

/// An intercepted request. Immutable once built.
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    method: Method,
    uri: Uri,
    absolute_url: String,
    scheme: String,
    host: String,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl InterceptedRequest {
    /// Build a request from a method and an absolute URL.
    pub fn new(method: Method, url: &str) -> Result<Self, RequestError> {
        let uri = Uri::from_str(url)
            .map_err(|e| RequestError::InvalidUrl(url.to_string(), e.to_string()))?;
        Self::from_uri(method, uri, url.to_string())
    }

    /// Shorthand for a `GET` request.
    pub fn get(url: &str) -> Result<Self, RequestError> {
        Self::new(Method::GET, url)
    }

    /// Build a request from the head of an HTTP request received by a server.
    ///
    /// Absolute-form targets (proxy style) are used as-is; origin-form
    /// targets are resolved against the `Host` header with `default_scheme`.
    pub fn from_parts(
        parts: &Parts,
        body: Option<Bytes>,
        default_scheme: &str,
    ) -> Result<Self, RequestError> {
        let request = if parts.uri.scheme().is_some() && parts.uri.authority().is_some() {
            let url = parts.uri.to_string();
            Self::from_uri(parts.method.clone(), parts.uri.clone(), url)?
        } else {
            let host = parts
                .headers
                .get(HOST)
                .and_then(|h| h.to_str().ok())
                .ok_or_else(|| RequestError::MissingHost(parts.uri.to_string()))?;
            let path_and_query = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let url = format!("{default_scheme}://{host}{path_and_query}");
            let uri = Uri::from_str(&url)
                .map_err(|e| RequestError::InvalidUrl(url.clone(), e.to_string()))?;
            Self::from_uri(parts.method.clone(), uri, url)?
        };

        Ok(Self {
            headers: parts.headers.clone(),
            body,
            ..request
        })
    }

    fn from_uri(method: Method, uri: Uri, absolute_url: String) -> Result<Self, RequestError> {
        let scheme = uri
            .scheme_str()
            .ok_or_else(|| RequestError::MissingScheme(absolute_url.clone()))?
            .to_string();
        let host = uri
            .host()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RequestError::MissingHost(absolute_url.clone()))?
            .to_string();

        Ok(Self {
            method,
            uri,
            absolute_url,
            scheme,
            host,
            headers: HeaderMap::new(),
            body: None,
        })
    }

    /// Add a header. Invalid names or values are skipped.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            self.headers.append(name, value);
        }
        self
    }

    /// Attach a request body.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The URL exactly as the request was issued.
    pub fn absolute_url(&self) -> &str {
        &self.absolute_url
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Host without port.
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Option<u16> {
        self.uri.port_u16()
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Case-insensitive header lookup; `None` for missing or non-UTF-8 values.
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}
